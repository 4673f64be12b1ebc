//! Parameter Space Expansion
//!
//! Turns a space's parameter declarations into the ordered list of
//! concrete parameter sets. The order is the cartesian product taken in
//! declaration order (first parameter varies slowest), which makes the
//! parameter-set index a stable resume key.

use std::collections::{BTreeMap, HashSet};

use log::debug;
use serde_json::{Number, Value};

use super::error::CompileError;
use crate::workflow::experiment::{ParameterDomain, RangeSpec, SpaceModel};

/// One concrete assignment of values to a space's parameters.
pub type ParameterSet = BTreeMap<String, Value>;

/// Guard against runaway ranges such as `0..1e12 step 1`.
const MAX_RANGE_VALUES: usize = 1_000_000;

/// Tolerance for accumulated floating-point error at the range end.
const RANGE_EPSILON: f64 = 1e-9;

/// Integral range values beyond this magnitude stay floats.
const I64_LIMIT: f64 = i64::MAX as f64;

/// Expands a space into its parameter sets.
///
/// A space without parameters expands to a single empty set. Identical
/// sets are kept: the index, not the content, identifies a run.
pub fn expand_space(space: &SpaceModel) -> Result<Vec<ParameterSet>, CompileError> {
    let mut seen = HashSet::new();
    for parameter in &space.parameters {
        if !seen.insert(parameter.name.as_str()) {
            return Err(CompileError::DuplicateParameter {
                space: space.name.clone(),
                parameter: parameter.name.clone(),
            });
        }
    }

    let mut combinations: Vec<ParameterSet> = vec![ParameterSet::new()];

    for parameter in &space.parameters {
        let domain = domain_values(&space.name, &parameter.name, &parameter.domain)?;
        if domain.is_empty() {
            return Err(CompileError::EmptyDomain {
                space: space.name.clone(),
                parameter: parameter.name.clone(),
            });
        }

        let mut next = Vec::with_capacity(combinations.len() * domain.len());
        for combination in &combinations {
            for value in &domain {
                let mut extended = combination.clone();
                extended.insert(parameter.name.clone(), value.clone());
                next.push(extended);
            }
        }
        combinations = next;
    }

    debug!(
        "Space '{}' expands to {} parameter set(s)",
        space.name,
        combinations.len()
    );
    Ok(combinations)
}

/// Produces the value domain of a single parameter.
pub fn domain_values(
    space: &str,
    parameter: &str,
    domain: &ParameterDomain,
) -> Result<Vec<Value>, CompileError> {
    match domain {
        ParameterDomain::Enum(values) => Ok(values.clone()),
        ParameterDomain::Range(range) => range_values(space, parameter, range),
        ParameterDomain::Expression(text) => Ok(vec![Value::String(text.clone())]),
    }
}

fn range_values(space: &str, parameter: &str, range: &RangeSpec) -> Result<Vec<Value>, CompileError> {
    let invalid = |reason: String| CompileError::InvalidRange {
        space: space.to_string(),
        parameter: parameter.to_string(),
        reason,
    };

    let RangeSpec { min, max, step } = *range;

    if !(min.is_finite() && max.is_finite() && step.is_finite()) {
        return Err(invalid("bounds and step must be finite".to_string()));
    }
    if step <= 0.0 {
        return Err(invalid(format!("step must be positive, got {}", step)));
    }
    if min > max {
        return Err(invalid(format!("min {} is greater than max {}", min, max)));
    }

    // Checked as f64 so a huge span never reaches the usize cast.
    let span = ((max - min) / step + RANGE_EPSILON).floor();
    if !span.is_finite() || span >= MAX_RANGE_VALUES as f64 {
        return Err(invalid(format!(
            "expands to {} values (limit {})",
            span + 1.0,
            MAX_RANGE_VALUES
        )));
    }
    let count = span as usize + 1;

    let integral = min.fract() == 0.0 && step.fract() == 0.0;

    (0..count)
        .map(|i| {
            let value = min + step * i as f64;
            if integral && value.abs() < I64_LIMIT {
                Ok(Value::Number(Number::from(value as i64)))
            } else {
                Number::from_f64(value)
                    .map(Value::Number)
                    .ok_or_else(|| invalid(format!("value {} is not representable", value)))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::experiment::ParameterDefinition;
    use serde_json::json;

    fn space_with(parameters: Vec<ParameterDefinition>) -> SpaceModel {
        let mut space = SpaceModel::new("S", "W");
        space.parameters = parameters;
        space
    }

    #[test]
    fn test_enum_times_range_in_declaration_order() {
        let space = space_with(vec![
            ParameterDefinition::enumeration("p", vec![json!("a"), json!("b")]),
            ParameterDefinition::range("q", 0.0, 4.0, 2.0),
        ]);

        let sets = expand_space(&space).unwrap();
        let pairs: Vec<(Value, Value)> = sets
            .iter()
            .map(|s| (s["p"].clone(), s["q"].clone()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                (json!("a"), json!(0)),
                (json!("a"), json!(2)),
                (json!("a"), json!(4)),
                (json!("b"), json!(0)),
                (json!("b"), json!(2)),
                (json!("b"), json!(4)),
            ]
        );
    }

    #[test]
    fn test_no_parameters_single_empty_set() {
        let sets = expand_space(&space_with(Vec::new())).unwrap();
        assert_eq!(sets.len(), 1);
        assert!(sets[0].is_empty());
    }

    #[test]
    fn test_expression_is_singleton_text() {
        let space = space_with(vec![ParameterDefinition::expression("r", "base * 2")]);
        let sets = expand_space(&space).unwrap();
        assert_eq!(sets, vec![ParameterSet::from([("r".to_string(), json!("base * 2"))])]);
    }

    #[test]
    fn test_fractional_range() {
        let values = domain_values(
            "S",
            "x",
            &ParameterDomain::Range(RangeSpec {
                min: 0.0,
                max: 0.3,
                step: 0.1,
            }),
        )
        .unwrap();

        assert_eq!(values.len(), 4);
        assert_eq!(values[0], json!(0.0));
        let last = values[3].as_f64().unwrap();
        assert!((last - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_range_not_reaching_max() {
        let values = domain_values(
            "S",
            "x",
            &ParameterDomain::Range(RangeSpec {
                min: 1.0,
                max: 6.0,
                step: 2.0,
            }),
        )
        .unwrap();
        assert_eq!(values, vec![json!(1), json!(3), json!(5)]);
    }

    #[test]
    fn test_single_point_range() {
        let values = domain_values(
            "S",
            "x",
            &ParameterDomain::Range(RangeSpec {
                min: 3.0,
                max: 3.0,
                step: 1.0,
            }),
        )
        .unwrap();
        assert_eq!(values, vec![json!(3)]);
    }

    #[test]
    fn test_degenerate_ranges_rejected() {
        for (min, max, step) in [(0.0, 4.0, 0.0), (0.0, 4.0, -1.0), (5.0, 1.0, 1.0)] {
            let space = space_with(vec![ParameterDefinition::range("q", min, max, step)]);
            assert!(matches!(
                expand_space(&space),
                Err(CompileError::InvalidRange { .. })
            ));
        }
    }

    #[test]
    fn test_oversized_range_rejected_without_overflow() {
        for (min, max, step) in [(0.0, 1e300, 1.0), (0.0, 2e6, 1.0), (-1e308, 1e308, 1e-300)] {
            let space = space_with(vec![ParameterDefinition::range("q", min, max, step)]);
            assert!(matches!(
                expand_space(&space),
                Err(CompileError::InvalidRange { .. })
            ));
        }
    }

    #[test]
    fn test_range_at_limit_accepted() {
        let values = domain_values(
            "S",
            "q",
            &ParameterDomain::Range(RangeSpec {
                min: 1.0,
                max: MAX_RANGE_VALUES as f64,
                step: 1.0,
            }),
        )
        .unwrap();
        assert_eq!(values.len(), MAX_RANGE_VALUES);
    }

    #[test]
    fn test_integral_values_beyond_i64_stay_exact() {
        let values = domain_values(
            "S",
            "x",
            &ParameterDomain::Range(RangeSpec {
                min: 1e19,
                max: 1e19,
                step: 1.0,
            }),
        )
        .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].as_f64(), Some(1e19));
        assert!(values[0].as_i64().is_none());
    }

    #[test]
    fn test_empty_enum_rejected() {
        let space = space_with(vec![ParameterDefinition::enumeration("p", Vec::new())]);
        assert!(matches!(
            expand_space(&space),
            Err(CompileError::EmptyDomain { .. })
        ));
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let space = space_with(vec![
            ParameterDefinition::enumeration("p", vec![json!(1)]),
            ParameterDefinition::enumeration("p", vec![json!(2)]),
        ]);
        assert!(matches!(
            expand_space(&space),
            Err(CompileError::DuplicateParameter { .. })
        ));
    }

    #[test]
    fn test_identical_sets_not_deduplicated() {
        let space = space_with(vec![ParameterDefinition::enumeration(
            "p",
            vec![json!(1), json!(1)],
        )]);
        assert_eq!(expand_space(&space).unwrap().len(), 2);
    }
}
