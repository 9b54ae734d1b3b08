use std::cmp::Ordering;

use crate::docstore::api::query::{FilterOperator, OrderDirection};
use crate::docstore::value::{WireKind, WireValue};

use super::apply::value_at;
use super::{FieldFilter, OrderBy, QuerySpec, WireDocument};

/// Filters, orders and limits `documents`, which must all be existing
/// members of the query's collection in key order.
pub(crate) fn evaluate(query: &QuerySpec, documents: Vec<WireDocument>) -> Vec<WireDocument> {
    let mut matches: Vec<WireDocument> = documents
        .into_iter()
        .filter(|document| matches_filters(document, &query.filters))
        .collect();

    // stable sort keeps key order as the final tie breaker
    matches.sort_by(|left, right| compare_documents(left, right, &query.order_by));

    if let Some(limit) = query.limit {
        matches.truncate(limit);
    }
    matches
}

fn matches_filters(document: &WireDocument, filters: &[FieldFilter]) -> bool {
    let Some(fields) = document.fields() else {
        return false;
    };
    filters.iter().all(|filter| match value_at(fields, &filter.field) {
        Some(value) => evaluate_filter(filter, value),
        None => false,
    })
}

fn evaluate_filter(filter: &FieldFilter, value: &WireValue) -> bool {
    match filter.operator {
        FilterOperator::Equal => values_equal(value, &filter.value),
        FilterOperator::NotEqual => !value.is_null() && !values_equal(value, &filter.value),
        FilterOperator::LessThan => compare_values(value, &filter.value) == Some(Ordering::Less),
        FilterOperator::LessThanOrEqual => matches!(
            compare_values(value, &filter.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::GreaterThan => {
            compare_values(value, &filter.value) == Some(Ordering::Greater)
        }
        FilterOperator::GreaterThanOrEqual => matches!(
            compare_values(value, &filter.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::ArrayContains => match value.kind() {
            WireKind::Array(values) => values.iter().any(|item| values_equal(item, &filter.value)),
            _ => false,
        },
        FilterOperator::In => match filter.value.kind() {
            WireKind::Array(needles) => needles.iter().any(|needle| values_equal(needle, value)),
            _ => false,
        },
        FilterOperator::NotIn => match filter.value.kind() {
            WireKind::Array(needles) => {
                !value.is_null() && needles.iter().all(|needle| !values_equal(needle, value))
            }
            _ => false,
        },
    }
}

/// Equality with integer/double cross comparison.
fn values_equal(left: &WireValue, right: &WireValue) -> bool {
    match (left.kind(), right.kind()) {
        (WireKind::Integer(_), WireKind::Double(_)) | (WireKind::Double(_), WireKind::Integer(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        _ => left == right,
    }
}

fn compare_documents(left: &WireDocument, right: &WireDocument, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let left_value = left.fields().and_then(|fields| value_at(fields, &order.field));
        let right_value = right.fields().and_then(|fields| value_at(fields, &order.field));
        let mut ordering = match (left_value, right_value) {
            (Some(a), Some(b)) => compare_values(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b))),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if order.direction == OrderDirection::Descending {
            ordering = ordering.reverse();
        }
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_values(left: &WireValue, right: &WireValue) -> Option<Ordering> {
    match (left.kind(), right.kind()) {
        (WireKind::Null, WireKind::Null) => Some(Ordering::Equal),
        (WireKind::Boolean(a), WireKind::Boolean(b)) => Some(a.cmp(b)),
        (WireKind::Integer(a), WireKind::Integer(b)) => Some(a.cmp(b)),
        (WireKind::Double(a), WireKind::Double(b)) => a.partial_cmp(b),
        (WireKind::Integer(a), WireKind::Double(b)) => (*a as f64).partial_cmp(b),
        (WireKind::Double(a), WireKind::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (WireKind::Timestamp(a), WireKind::Timestamp(b)) => Some(a.cmp(b)),
        (WireKind::String(a), WireKind::String(b)) => Some(a.cmp(b)),
        (WireKind::Reference(a), WireKind::Reference(b)) => Some(a.cmp(b)),
        (WireKind::Bytes(a), WireKind::Bytes(b)) => Some(a.as_slice().cmp(b.as_slice())),
        _ => None,
    }
}

/// Cross-type ordering so mixed-type fields sort deterministically.
fn type_rank(value: &WireValue) -> u8 {
    match value.kind() {
        WireKind::Null => 0,
        WireKind::Boolean(_) => 1,
        WireKind::Integer(_) | WireKind::Double(_) => 2,
        WireKind::Timestamp(_) => 3,
        WireKind::String(_) => 4,
        WireKind::Bytes(_) => 5,
        WireKind::Reference(_) => 6,
        WireKind::GeoPoint(_) => 7,
        WireKind::Array(_) => 8,
        WireKind::Map(_) => 9,
        WireKind::Operation(_) => 10,
    }
}
