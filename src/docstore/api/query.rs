use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::docstore::backend::{FieldFilter, OrderBy, QuerySpec};
use crate::docstore::error::{invalid_argument, DocstoreError, DocstoreResult};
use crate::docstore::marshal::Marshaller;
use crate::docstore::model::{FieldPath, IntoFieldPath};
use crate::docstore::value::Value;

use super::reference::Collection;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    In,
    NotIn,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "==",
            FilterOperator::NotEqual => "!=",
            FilterOperator::LessThan => "<",
            FilterOperator::LessThanOrEqual => "<=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::GreaterThanOrEqual => ">=",
            FilterOperator::ArrayContains => "array-contains",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not-in",
        }
    }

    fn expects_list(&self) -> bool {
        matches!(self, FilterOperator::In | FilterOperator::NotIn)
    }
}

impl FromStr for FilterOperator {
    type Err = DocstoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let operator = match s {
            "==" => FilterOperator::Equal,
            "!=" => FilterOperator::NotEqual,
            "<" => FilterOperator::LessThan,
            "<=" => FilterOperator::LessThanOrEqual,
            ">" => FilterOperator::GreaterThan,
            ">=" => FilterOperator::GreaterThanOrEqual,
            "array-contains" => FilterOperator::ArrayContains,
            "in" => FilterOperator::In,
            "not-in" => FilterOperator::NotIn,
            other => {
                return Err(invalid_argument(format!(
                    "Unknown filter operator '{other}'"
                )))
            }
        };
        Ok(operator)
    }
}

impl Display for FilterOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Ascending => "asc",
            OrderDirection::Descending => "desc",
        }
    }
}

/// Collection query built from field filters, orderings and a limit.
///
/// Invalid arguments are remembered and reported when the query is executed,
/// before anything is sent to the backend.
#[derive(Clone, Debug)]
pub struct Query {
    collection: Collection,
    filters: Vec<(FieldPath, FilterOperator, Value)>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
    error: Option<DocstoreError>,
}

impl Query {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            error: None,
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn where_field(
        mut self,
        path: impl IntoFieldPath,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> Self {
        let value = value.into();
        let checked = path.into_field_path().and_then(|path| {
            validate_operand(operator, &value)?;
            Ok(path)
        });
        match checked {
            Ok(path) => self.filters.push((path, operator, value)),
            Err(err) => self.remember(err),
        }
        self
    }

    pub fn order_by(mut self, path: impl IntoFieldPath, direction: OrderDirection) -> Self {
        match path.into_field_path() {
            Ok(field) => self.order_by.push(OrderBy { field, direction }),
            Err(err) => self.remember(err),
        }
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn remember(&mut self, error: DocstoreError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Validates and marshals the query into its backend form.
    pub fn to_spec(&self, marshaller: &Marshaller) -> DocstoreResult<QuerySpec> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let mut spec = QuerySpec::collection(self.collection.path().clone());
        for (field, operator, value) in &self.filters {
            spec.filters.push(FieldFilter {
                field: field.clone(),
                operator: *operator,
                value: marshaller.to_wire(value)?,
            });
        }
        spec.order_by = self.order_by.clone();
        spec.limit = self.limit;
        Ok(spec)
    }
}

fn validate_operand(operator: FilterOperator, value: &Value) -> DocstoreResult<()> {
    if value.contains_sentinel() {
        return Err(invalid_argument(format!(
            "Filter values cannot contain sentinels (operator '{operator}')"
        )));
    }
    if operator.expects_list() && value.as_array().is_none() {
        return Err(invalid_argument(format!(
            "The '{operator}' filter requires an array value"
        )));
    }
    Ok(())
}

impl Collection {
    /// Starts a query over every document of this collection.
    pub fn query(&self) -> Query {
        Query::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::model::DatabaseId;

    fn users() -> Collection {
        Collection::new("users").unwrap()
    }

    #[test]
    fn builds_backend_spec() {
        let marshaller = Marshaller::new(DatabaseId::default("demo"));
        let spec = users()
            .query()
            .where_field("age", FilterOperator::GreaterThanOrEqual, 18)
            .order_by("age", OrderDirection::Descending)
            .limit(5)
            .to_spec(&marshaller)
            .unwrap();
        assert_eq!(spec.collection.canonical_string(), "users");
        assert_eq!(spec.filters.len(), 1);
        assert_eq!(spec.order_by[0].direction, OrderDirection::Descending);
        assert_eq!(spec.limit, Some(5));
        assert_eq!(spec.to_json()["where"][0]["op"], ">=");
    }

    #[test]
    fn invalid_arguments_are_reported_on_execution() {
        let marshaller = Marshaller::new(DatabaseId::default("demo"));
        let query = users()
            .query()
            .where_field("role", FilterOperator::In, "admin")
            .where_field("at", FilterOperator::Equal, Value::server_timestamp());
        let err = query.to_spec(&marshaller).unwrap_err();
        assert!(err.message().contains("requires an array"));
    }

    #[test]
    fn parses_operator_symbols() {
        assert_eq!("not-in".parse::<FilterOperator>().unwrap(), FilterOperator::NotIn);
        assert!("~=".parse::<FilterOperator>().is_err());
    }
}
