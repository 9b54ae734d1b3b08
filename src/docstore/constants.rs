pub(crate) const DEFAULT_DATABASE_ID: &str = "(default)";
pub(crate) const FIELD_PATH_DELIMITER: char = '.';
pub(crate) const RESOURCE_PATH_DELIMITER: char = '/';
pub(crate) const MAX_BATCH_WRITES: usize = 500;
pub(crate) const DEFAULT_MAX_TRANSACTION_ATTEMPTS: usize = 5;
pub(crate) const AUTO_ID_LENGTH: usize = 20;
