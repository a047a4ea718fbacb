//! Plan preprocessing.
//!
//! Before a resource's plan callback runs (and instead of it, when none is
//! registered), the proposed state is reconciled against the schema:
//! computed attributes the practitioner left null are filled from prior
//! state when available, or marked unknown so the host can display "known
//! after apply". Attributes flagged as requiring replacement record their
//! paths into a call-scoped [`ReplacementTracker`].
//!
//! Delete never plans, so the operation is create exactly when there is no
//! prior state.

use crate::diagnostics::{AttributePath, PathStep};
use crate::schema::{flatten_fields, AttrType, Attribute, Fields, Schema};
use crate::value::Value;

/// Collects the attribute paths whose changes force resource replacement
/// during a single plan call.
#[derive(Debug, Default)]
pub struct ReplacementTracker {
    paths: Vec<AttributePath>,
}

impl ReplacementTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a path as requiring replacement.
    pub fn add(&mut self, path: AttributePath) {
        self.paths.push(path);
    }

    /// The recorded paths.
    pub fn paths(&self) -> &[AttributePath] {
        &self.paths
    }

    /// Whether any path was recorded.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PlanOperation {
    Create,
    Update,
}

/// Reconcile prior and proposed state against a schema, producing the
/// adjusted proposed state and recording replacement-forcing paths.
pub fn preprocess_plan(
    schema: &Schema,
    prior_state: Option<&Value>,
    proposed_state: &Value,
    tracker: &mut ReplacementTracker,
) -> Value {
    let operation = if prior_state.is_none() {
        PlanOperation::Create
    } else {
        PlanOperation::Update
    };
    preprocess_object(
        prior_state.unwrap_or(&Value::Null),
        proposed_state,
        &schema.attributes,
        &Vec::new(),
        operation,
        tracker,
    )
}

fn preprocess_object(
    prior: &Value,
    proposed: &Value,
    fields: &Fields,
    path: &AttributePath,
    operation: PlanOperation,
    tracker: &mut ReplacementTracker,
) -> Value {
    if proposed.is_null_or_unknown() {
        return proposed.clone();
    }
    let mut out = std::collections::BTreeMap::new();
    flatten_fields(fields, false, &mut |name, attr, _| {
        let prior_field = prior.get(name).unwrap_or(&Value::Null);
        let proposed_field = proposed.get(name).unwrap_or(&Value::Null);
        let mut attr_path = path.clone();
        attr_path.push(PathStep::attribute(name));
        out.insert(
            name.to_string(),
            preprocess_attribute(prior_field, proposed_field, attr, attr_path, operation, tracker),
        );
    });
    Value::Object(out)
}

fn preprocess_attribute(
    prior: &Value,
    proposed: &Value,
    attr: &Attribute,
    path: AttributePath,
    operation: PlanOperation,
    tracker: &mut ReplacementTracker,
) -> Value {
    if attr.requires_replacement && operation == PlanOperation::Update {
        // TODO: only record the path when the value actually changed between
        // prior and proposed state.
        tracker.add(path.clone());
    }

    if attr.presence.plans_computed() && proposed.is_null() {
        return if prior.is_null() {
            Value::unknown()
        } else {
            prior.clone()
        };
    }

    match &attr.attr_type {
        AttrType::Any
        | AttrType::Array(_)
        | AttrType::Bool
        | AttrType::Custom(_)
        | AttrType::Number
        | AttrType::String => proposed.clone(),
        AttrType::List(fields) => {
            if proposed.is_null_or_unknown() {
                return proposed.clone();
            }
            match proposed {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(index, item)| {
                            let prior_item = prior
                                .as_array()
                                .and_then(|items| items.get(index))
                                .unwrap_or(&Value::Null);
                            let mut item_path = path.clone();
                            item_path.push(PathStep::index(index as i64));
                            preprocess_object(
                                prior_item, item, fields, &item_path, operation, tracker,
                            )
                        })
                        .collect(),
                ),
                _ => proposed.clone(),
            }
        }
        AttrType::Object(fields) => {
            preprocess_object(prior, proposed, fields, &path, operation, tracker)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{fields, Attribute, Presence, Schema, Union};

    fn plan(
        schema: &Schema,
        prior: Option<&Value>,
        proposed: &Value,
    ) -> (Value, ReplacementTracker) {
        let mut tracker = ReplacementTracker::new();
        let adjusted = preprocess_plan(schema, prior, proposed, &mut tracker);
        (adjusted, tracker)
    }

    fn name_id_schema() -> Schema {
        Schema::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("id", Attribute::computed_string())
    }

    #[test]
    fn test_create_fills_computed_with_unknown() {
        let schema = name_id_schema();
        let (adjusted, _) = plan(&schema, None, &Value::object([("name", Value::from("x"))]));

        assert_eq!(adjusted.get("name"), Some(&Value::from("x")));
        assert!(adjusted.get("id").unwrap().is_unknown());
    }

    #[test]
    fn test_update_fills_computed_from_prior() {
        let schema = name_id_schema();
        let prior = Value::object([("name", Value::from("x")), ("id", Value::from("5"))]);
        let (adjusted, _) = plan(
            &schema,
            Some(&prior),
            &Value::object([("name", Value::from("y"))]),
        );

        assert_eq!(adjusted.get("name"), Some(&Value::from("y")));
        assert_eq!(adjusted.get("id"), Some(&Value::from("5")));
    }

    #[test]
    fn test_update_without_prior_value_falls_back_to_unknown() {
        let schema = name_id_schema();
        let prior = Value::object([("name", Value::from("x"))]);
        let (adjusted, _) = plan(
            &schema,
            Some(&prior),
            &Value::object([("name", Value::from("y"))]),
        );

        assert!(adjusted.get("id").unwrap().is_unknown());
    }

    #[test]
    fn test_supplied_values_pass_through() {
        let schema = Schema::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "ttl",
                Attribute::new(AttrType::Number, Presence::ComputedIfNotGiven),
            );
        let proposed = Value::object([("name", Value::from("x")), ("ttl", Value::from(60_i64))]);
        let (adjusted, _) = plan(&schema, None, &proposed);

        assert_eq!(adjusted.get("ttl"), Some(&Value::from(60_i64)));
    }

    #[test]
    fn test_replacement_recorded_on_every_update() {
        let schema = Schema::new()
            .with_attribute("k", Attribute::required_string().with_requires_replacement());

        // Even an unchanged value records the path on update.
        let prior = Value::object([("k", Value::from("same"))]);
        let (_, tracker) = plan(
            &schema,
            Some(&prior),
            &Value::object([("k", Value::from("same"))]),
        );
        assert_eq!(tracker.paths(), &[vec![PathStep::attribute("k")]]);
    }

    #[test]
    fn test_replacement_never_recorded_on_create() {
        let schema = Schema::new()
            .with_attribute("k", Attribute::required_string().with_requires_replacement());

        let (_, tracker) = plan(&schema, None, &Value::object([("k", Value::from("v"))]));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_null_proposed_container_stops_recursion() {
        let schema = Schema::new().with_attribute(
            "endpoint",
            Attribute::new(
                AttrType::Object(fields([
                    ("host", Attribute::required_string().with_requires_replacement()),
                    ("fingerprint", Attribute::computed_string()),
                ])),
                Presence::Optional,
            ),
        );

        let prior = Value::object([(
            "endpoint",
            Value::object([("host", Value::from("a")), ("fingerprint", Value::from("f"))]),
        )]);
        let (adjusted, tracker) = plan(
            &schema,
            Some(&prior),
            &Value::object([("endpoint", Value::Null)]),
        );

        // The absent container has no defined children: no unknown
        // substitution and no replacement tracking below it.
        assert_eq!(adjusted.get("endpoint"), Some(&Value::Null));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_unknown_proposed_container_passes_through() {
        let schema = Schema::new().with_attribute(
            "endpoint",
            Attribute::new(
                AttrType::Object(fields([("host", Attribute::required_string())])),
                Presence::Optional,
            ),
        );

        let (adjusted, _) = plan(
            &schema,
            None,
            &Value::object([("endpoint", Value::unknown())]),
        );
        assert!(adjusted.get("endpoint").unwrap().is_unknown());
    }

    #[test]
    fn test_list_elements_pair_positionally() {
        let schema = Schema::new().with_attribute(
            "rules",
            Attribute::new(
                AttrType::List(fields([
                    ("port", Attribute::required_number()),
                    ("id", Attribute::computed_string()),
                ])),
                Presence::Optional,
            ),
        );

        let prior = Value::object([(
            "rules",
            Value::array([
                Value::object([("port", Value::from(80_i64)), ("id", Value::from("r0"))]),
                Value::object([("port", Value::from(443_i64)), ("id", Value::from("r1"))]),
            ]),
        )]);
        let proposed = Value::object([(
            "rules",
            Value::array([
                Value::object([("port", Value::from(80_i64))]),
                Value::object([("port", Value::from(8443_i64))]),
                Value::object([("port", Value::from(9000_i64))]),
            ]),
        )]);

        let (adjusted, _) = plan(&schema, Some(&prior), &proposed);
        let rules = adjusted.get("rules").unwrap().as_array().unwrap();

        assert_eq!(rules[0].get("id"), Some(&Value::from("r0")));
        assert_eq!(rules[1].get("id"), Some(&Value::from("r1")));
        // No prior element to pair with: computed falls back to unknown.
        assert!(rules[2].get("id").unwrap().is_unknown());
    }

    #[test]
    fn test_union_alternatives_plan_like_siblings() {
        let schema = Schema::new().with_union(
            "handle",
            Union::new([
                fields([("did", Attribute::required_string())]),
                fields([("alias", Attribute::required_string())]),
            ]),
        );

        let (adjusted, _) = plan(
            &schema,
            None,
            &Value::object([("did", Value::from("did:plc:abc"))]),
        );
        assert_eq!(adjusted.get("did"), Some(&Value::from("did:plc:abc")));
        assert_eq!(adjusted.get("alias"), Some(&Value::Null));
    }

    #[test]
    fn test_replacement_path_inside_list() {
        let schema = Schema::new().with_attribute(
            "rules",
            Attribute::new(
                AttrType::List(fields([(
                    "port",
                    Attribute::required_number().with_requires_replacement(),
                )])),
                Presence::Optional,
            ),
        );

        let prior = Value::object([(
            "rules",
            Value::array([Value::object([("port", Value::from(80_i64))])]),
        )]);
        let (_, tracker) = plan(&schema, Some(&prior), &prior.clone());

        assert_eq!(
            tracker.paths(),
            &[vec![
                PathStep::attribute("rules"),
                PathStep::index(0),
                PathStep::attribute("port"),
            ]]
        );
    }
}
