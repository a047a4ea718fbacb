//! Configuration validation against a schema.
//!
//! Validation walks a decoded configuration alongside its schema and records
//! problems as [`Diagnostics`]; it never fails the surrounding operation by
//! itself. Unknown values are valid by definition at any position, and null
//! is only an error for required attributes.
//!
//! Union fields validate each alternative independently in an isolated
//! diagnostics scope. The union is satisfied when at least one alternative
//! produces no diagnostics at all.

use crate::diagnostics::{AttributePath, Diagnostic, Diagnostics, PathStep};
use crate::schema::{AttrType, Attribute, Field, Fields, Presence, ScalarType, Schema, Union};
use crate::value::Value;

/// Validate a configuration value against a schema, recording any problems.
pub fn validate_config(config: &Value, schema: &Schema, diagnostics: &mut Diagnostics) {
    validate_object(config, &schema.attributes, &Vec::new(), diagnostics);
}

fn validate_object(
    value: &Value,
    fields: &Fields,
    path: &AttributePath,
    diagnostics: &mut Diagnostics,
) {
    if value.is_null_or_unknown() {
        return;
    }
    for (name, field) in fields {
        match field {
            Field::Union(union) => validate_union(value, union, name, path, diagnostics),
            Field::Attr(attr) => {
                let mut attr_path = path.clone();
                attr_path.push(PathStep::attribute(name));
                validate_attribute(
                    value.get(name).unwrap_or(&Value::Null),
                    attr,
                    name,
                    &attr_path,
                    diagnostics,
                );
            }
        }
    }
}

fn validate_attribute(
    value: &Value,
    attr: &Attribute,
    name: &str,
    path: &AttributePath,
    diagnostics: &mut Diagnostics,
) {
    if value.is_unknown() {
        return;
    }
    if value.is_null() {
        match attr.presence {
            Presence::Computed
            | Presence::ComputedIfNotGiven
            | Presence::Optional
            | Presence::RequiredToBeComputed => {}
            Presence::Required => diagnostics.error(
                path.clone(),
                format!("Required attribute '{}' is missing", name),
            ),
        }
        return;
    }

    match &attr.attr_type {
        AttrType::Any => {}
        AttrType::String => {
            if value.as_str().is_none() {
                diagnostics.error(path.clone(), "Attribute has the wrong type");
            }
        }
        AttrType::Number => {
            if value.as_f64().is_none() {
                diagnostics.error(path.clone(), "Attribute has the wrong type");
            }
        }
        AttrType::Bool => {
            if value.as_bool().is_none() {
                diagnostics.error(path.clone(), "Attribute has the wrong type");
            }
        }
        AttrType::Custom(underlying) => {
            if !scalar_matches(value, *underlying) {
                diagnostics.error(path.clone(), "Attribute has the wrong type");
            }
        }
        AttrType::Array(item) => match value.as_array() {
            Some(items) => {
                for (index, element) in items.iter().enumerate() {
                    if !element.is_null_or_unknown() && !scalar_matches(element, *item) {
                        let mut element_path = path.clone();
                        element_path.push(PathStep::index(index as i64));
                        diagnostics.error(element_path, "Attribute has the wrong type");
                    }
                }
            }
            None => diagnostics.error(path.clone(), "Attribute has the wrong type"),
        },
        AttrType::List(fields) => match value.as_array() {
            Some(items) => {
                for (index, element) in items.iter().enumerate() {
                    let mut element_path = path.clone();
                    element_path.push(PathStep::index(index as i64));
                    validate_object(element, fields, &element_path, diagnostics);
                }
            }
            None => diagnostics.error(path.clone(), "Attribute has the wrong type"),
        },
        AttrType::Object(fields) => validate_object(value, fields, path, diagnostics),
    }
}

fn scalar_matches(value: &Value, scalar: ScalarType) -> bool {
    match scalar {
        ScalarType::String => value.as_str().is_some(),
        ScalarType::Number => value.as_f64().is_some(),
        ScalarType::Bool => value.as_bool().is_some(),
    }
}

fn validate_union(
    value: &Value,
    union: &Union,
    field_name: &str,
    path: &AttributePath,
    diagnostics: &mut Diagnostics,
) {
    let mut results = Vec::with_capacity(union.alternatives.len());
    for alternative in &union.alternatives {
        let mut scope = Diagnostics::new();
        validate_object(value, alternative, path, &mut scope);
        results.push(scope);
    }
    if results.iter().any(Diagnostics::is_empty) {
        return;
    }

    // When every alternative is a single required field and none of them was
    // supplied at all, collapse the failures into one friendly message. A
    // supplied-but-invalid field keeps its own diagnostic instead.
    if let Some(names) = union.single_required_field_names() {
        let any_supplied = names
            .iter()
            .any(|name| value.get(name).is_some_and(|v| !v.is_null()));
        if !any_supplied {
            diagnostics.error(
                path.clone(),
                format!(
                    "Union {} requires one of the following fields: {}",
                    field_name,
                    names.join(", ")
                ),
            );
            return;
        }
    }

    for scope in &results {
        let Some(first) = scope.items().first() else {
            continue;
        };
        let at = if first.path.is_empty() {
            path.clone()
        } else {
            first.path.clone()
        };
        diagnostics.push(
            Diagnostic::error(format!(
                "No valid alternative found for union '{}'",
                field_name
            ))
            .with_detail(format!(
                "Failed to validate: {}\n\n{}",
                first.summary,
                first.detail.clone().unwrap_or_default()
            ))
            .at(at),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{fields, Attribute, Presence, Schema};

    fn diagnostics_for(config: &Value, schema: &Schema) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        validate_config(config, schema, &mut diagnostics);
        diagnostics
    }

    #[test]
    fn test_valid_config() {
        let schema = Schema::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("count", Attribute::optional_number());

        let diagnostics = diagnostics_for(
            &Value::object([("name", Value::from("x")), ("count", Value::from(2_i64))]),
            &schema,
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_required_attribute_missing() {
        let schema = Schema::new().with_attribute("name", Attribute::required_string());

        let diagnostics = diagnostics_for(&Value::object::<&str, _>([]), &schema);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.items()[0].summary,
            "Required attribute 'name' is missing"
        );
        assert_eq!(
            diagnostics.items()[0].path,
            vec![PathStep::attribute("name")]
        );
    }

    #[test]
    fn test_null_is_fine_for_non_required_presences() {
        let schema = Schema::new()
            .with_attribute("a", Attribute::optional_string())
            .with_attribute("b", Attribute::computed_string())
            .with_attribute(
                "c",
                Attribute::new(AttrType::String, Presence::ComputedIfNotGiven),
            )
            .with_attribute(
                "d",
                Attribute::new(AttrType::String, Presence::RequiredToBeComputed),
            );

        let diagnostics = diagnostics_for(&Value::object::<&str, _>([]), &schema);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_wrong_primitive_type() {
        let schema = Schema::new().with_attribute("name", Attribute::required_string());

        let diagnostics = diagnostics_for(&Value::object([("name", Value::from(5_i64))]), &schema);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics.items()[0].summary, "Attribute has the wrong type");
    }

    #[test]
    fn test_unknown_skips_all_checks() {
        let schema = Schema::new().with_attribute("name", Attribute::required_string());

        let diagnostics = diagnostics_for(&Value::object([("name", Value::unknown())]), &schema);
        assert!(diagnostics.is_empty());

        // A whole-config unknown is valid too.
        let diagnostics = diagnostics_for(&Value::unknown(), &schema);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_custom_checks_underlying_scalar() {
        let schema = Schema::new().with_attribute(
            "did",
            Attribute::new(AttrType::Custom(ScalarType::String), Presence::Required),
        );

        assert!(diagnostics_for(&Value::object([("did", Value::from("x"))]), &schema).is_empty());
        assert_eq!(
            diagnostics_for(&Value::object([("did", Value::from(1_i64))]), &schema).len(),
            1
        );
    }

    #[test]
    fn test_list_elements_validate_as_objects() {
        let schema = Schema::new().with_attribute(
            "rules",
            Attribute::new(
                AttrType::List(fields([("port", Attribute::required_number())])),
                Presence::Required,
            ),
        );

        let diagnostics = diagnostics_for(
            &Value::object([(
                "rules",
                Value::array([
                    Value::object([("port", Value::from(80_i64))]),
                    Value::object([("port", Value::from("not a number"))]),
                ]),
            )]),
            &schema,
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.items()[0].path,
            vec![
                PathStep::attribute("rules"),
                PathStep::index(1),
                PathStep::attribute("port"),
            ]
        );
    }

    #[test]
    fn test_list_requires_an_array() {
        let schema = Schema::new().with_attribute(
            "rules",
            Attribute::new(AttrType::List(Fields::new()), Presence::Required),
        );

        let diagnostics =
            diagnostics_for(&Value::object([("rules", Value::from("nope"))]), &schema);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_union_accepts_a_matching_alternative() {
        let schema = Schema::new().with_union(
            "handle",
            Union::new([
                fields([("a", Attribute::required_string())]),
                fields([("b", Attribute::required_string())]),
            ]),
        );

        let diagnostics = diagnostics_for(&Value::object([("a", Value::from("x"))]), &schema);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_union_collapses_to_requires_one_of() {
        let schema = Schema::new().with_union(
            "handle",
            Union::new([
                fields([("a", Attribute::required_string())]),
                fields([("b", Attribute::required_string())]),
            ]),
        );

        let diagnostics = diagnostics_for(&Value::object::<&str, _>([]), &schema);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.items()[0].summary,
            "Union handle requires one of the following fields: a, b"
        );
    }

    #[test]
    fn test_union_wrong_type_keeps_the_type_diagnostic() {
        let schema = Schema::new().with_union(
            "handle",
            Union::new([
                fields([("a", Attribute::required_string())]),
                fields([("b", Attribute::required_string())]),
            ]),
        );

        let diagnostics = diagnostics_for(&Value::object([("a", Value::from(1_i64))]), &schema);
        assert!(!diagnostics.is_empty());
        assert!(diagnostics
            .items()
            .iter()
            .all(|d| !d.summary.contains("requires one of")));
        assert!(diagnostics.items().iter().any(|d| d
            .detail
            .as_deref()
            .is_some_and(|detail| detail.contains("Attribute has the wrong type"))));
    }

    #[test]
    fn test_union_failure_points_at_the_failing_path() {
        let schema = Schema::new().with_union(
            "target",
            Union::new([fields([
                ("host", Attribute::required_string()),
                ("port", Attribute::required_number()),
            ])]),
        );

        let diagnostics =
            diagnostics_for(&Value::object([("host", Value::from("x"))]), &schema);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.items()[0].path,
            vec![PathStep::attribute("port")]
        );
    }
}
