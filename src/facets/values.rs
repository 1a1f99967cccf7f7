use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

pub const BLANK_ID: &str = "__blank__";
pub const BLANK_LABEL: &str = "(Blank)";

/// One distinct value of a field and the number of documents carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueFacet {
    pub id: String,
    pub label: String,
    pub count: i64,
}

impl ValueFacet {
    pub fn blank(count: i64) -> Self {
        Self {
            id: BLANK_ID.to_string(),
            label: BLANK_LABEL.to_string(),
            count,
        }
    }
}

/// Splits a stored value into its atomic parts. Fields may pack several
/// values into one instance, separated by `,`, `:` or `;`.
pub fn decompose(raw: &str) -> Vec<&str> {
    raw.split([',', ':', ';'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

/// Stable id for a free-form value: a 31-based rolling hash over its chars.
pub fn value_id(value: &str) -> String {
    let hash = value
        .chars()
        .fold(0i64, |hash, c| hash.wrapping_mul(31).wrapping_add(c as i64));
    format!("val-{hash}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Count,
    Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOptions {
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub ignore_case: bool,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            sort_by: SortBy::Count,
            sort_order: SortOrder::Desc,
            ignore_case: false,
        }
    }
}

impl SortOptions {
    /// Anything other than `count` sorts by label; anything other than
    /// `asc` sorts descending. A missing order is descending for counts and
    /// ascending for labels.
    pub fn from_params(sort_by: Option<&str>, sort_order: Option<&str>, ignore_case: bool) -> Self {
        let sort_by = match sort_by.map(str::trim).filter(|value| !value.is_empty()) {
            None => SortBy::Count,
            Some(value) if value.eq_ignore_ascii_case("count") => SortBy::Count,
            Some(_) => SortBy::Label,
        };
        let sort_order = match sort_order.map(str::trim).filter(|value| !value.is_empty()) {
            None if sort_by == SortBy::Count => SortOrder::Desc,
            None => SortOrder::Asc,
            Some(value) if value.eq_ignore_ascii_case("asc") => SortOrder::Asc,
            Some(_) => SortOrder::Desc,
        };
        Self {
            sort_by,
            sort_order,
            ignore_case,
        }
    }
}

fn compare_labels(a: &str, b: &str, ignore_case: bool) -> Ordering {
    if ignore_case {
        a.to_lowercase().cmp(&b.to_lowercase())
    } else {
        a.cmp(b)
    }
}

/// Orders facets in place.
///
/// By count: count in the requested direction, ties by label ascending.
/// By label: label in the requested direction, ties by count ascending.
pub fn sort_values(values: &mut [ValueFacet], options: &SortOptions) {
    let ignore_case = options.ignore_case;
    values.sort_by(|a, b| match options.sort_by {
        SortBy::Count => {
            let by_count = match options.sort_order {
                SortOrder::Asc => a.count.cmp(&b.count),
                SortOrder::Desc => b.count.cmp(&a.count),
            };
            by_count.then_with(|| compare_labels(&a.label, &b.label, ignore_case))
        }
        SortBy::Label => {
            let by_label = compare_labels(&a.label, &b.label, ignore_case);
            let by_label = match options.sort_order {
                SortOrder::Asc => by_label,
                SortOrder::Desc => by_label.reverse(),
            };
            by_label.then_with(|| a.count.cmp(&b.count))
        }
    });
}

/// Keeps facets whose label contains `query`.
pub fn filter_by_label(values: Vec<ValueFacet>, query: &str, ignore_case: bool) -> Vec<ValueFacet> {
    if ignore_case {
        let needle = query.to_lowercase();
        values
            .into_iter()
            .filter(|facet| facet.label.to_lowercase().contains(&needle))
            .collect()
    } else {
        values
            .into_iter()
            .filter(|facet| facet.label.contains(query))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facet(label: &str, count: i64) -> ValueFacet {
        ValueFacet {
            id: value_id(label),
            label: label.to_string(),
            count,
        }
    }

    fn labels(values: &[ValueFacet]) -> Vec<&str> {
        values.iter().map(|facet| facet.label.as_str()).collect()
    }

    #[test]
    fn decomposes_on_all_separators() {
        assert_eq!(decompose("Paris:London,Paris"), vec!["Paris", "London", "Paris"]);
        assert_eq!(decompose(" a ; b,,c : "), vec!["a", "b", "c"]);
        assert!(decompose(" , ;:").is_empty());
    }

    #[test]
    fn decomposed_parts_are_trimmed_and_non_empty() {
        for raw in ["  x  ", "a,\tb", ";;", "one: two ;three", ""] {
            for part in decompose(raw) {
                assert!(!part.is_empty());
                assert_eq!(part, part.trim());
            }
        }
    }

    #[test]
    fn value_ids_are_stable() {
        assert_eq!(value_id("A"), "val-65");
        assert_eq!(value_id("AB"), format!("val-{}", 65 * 31 + 66));
        assert_eq!(value_id(""), "val-0");
        assert_eq!(value_id("Paris"), value_id("Paris"));
        assert_ne!(value_id("Paris"), value_id("London"));
    }

    #[test]
    fn long_values_wrap_instead_of_overflowing() {
        let long = "z".repeat(200);
        assert!(value_id(&long).starts_with("val-"));
    }

    #[test]
    fn count_desc_breaks_ties_by_label() {
        let mut values = vec![facet("C", 3), facet("B", 5), facet("A", 5)];
        sort_values(&mut values, &SortOptions::default());
        assert_eq!(labels(&values), vec!["A", "B", "C"]);
    }

    #[test]
    fn count_asc_still_breaks_ties_ascending() {
        let mut values = vec![facet("b", 2), facet("a", 2), facet("c", 1)];
        let options = SortOptions::from_params(Some("count"), Some("asc"), false);
        sort_values(&mut values, &options);
        assert_eq!(labels(&values), vec!["c", "a", "b"]);
    }

    #[test]
    fn label_sort_breaks_ties_by_count_ascending() {
        let mut values = vec![facet("x", 4), facet("X", 1), facet("a", 9)];
        let options = SortOptions::from_params(Some("label"), None, true);
        sort_values(&mut values, &options);
        assert_eq!(labels(&values), vec!["a", "X", "x"]);

        let options = SortOptions::from_params(Some("label"), Some("desc"), true);
        sort_values(&mut values, &options);
        assert_eq!(labels(&values), vec!["X", "x", "a"]);
    }

    #[test]
    fn case_sensitive_label_sort_uses_byte_order() {
        let mut values = vec![facet("b", 1), facet("B", 1), facet("a", 1)];
        let options = SortOptions::from_params(Some("label"), Some("asc"), false);
        sort_values(&mut values, &options);
        assert_eq!(labels(&values), vec!["B", "a", "b"]);
    }

    #[test]
    fn sort_params_fall_back_to_defaults() {
        assert_eq!(SortOptions::from_params(None, None, false), SortOptions::default());
        let options = SortOptions::from_params(Some("name"), None, false);
        assert_eq!(options.sort_by, SortBy::Label);
        assert_eq!(options.sort_order, SortOrder::Asc);
        let options = SortOptions::from_params(Some("COUNT"), Some("sideways"), false);
        assert_eq!(options.sort_by, SortBy::Count);
        assert_eq!(options.sort_order, SortOrder::Desc);
    }

    #[test]
    fn filters_labels_by_substring() {
        let values = vec![facet("Paris", 1), facet("London", 1), facet("paris-nord", 1)];
        assert_eq!(labels(&filter_by_label(values.clone(), "Par", false)), vec!["Paris"]);
        assert_eq!(
            labels(&filter_by_label(values, "par", true)),
            vec!["Paris", "paris-nord"]
        );
    }
}
