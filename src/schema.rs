//! Schema types describing the shape of provider, resource, and data source
//! configuration.
//!
//! A [`Schema`] maps field names to attributes. Each attribute pairs a type
//! with a [`Presence`] describing who supplies the value (the practitioner,
//! the provider, or both). A field may instead be a [`Union`]: a set of
//! alternative field maps of which exactly one is expected to match.
//!
//! Schemas compile one-way into the protocol's wire representation via
//! [`Schema::to_proto`]. The wire format has no union concept, so union
//! alternatives are flattened into their parent's attribute list; the
//! original union structure cannot be recovered from the compiled form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::generated::tfplugin6 as proto;

/// A scalar attribute type, used where composite types are not allowed
/// (array elements and custom type refinements).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// A string value.
    String,
    /// A numeric value.
    Number,
    /// A boolean value.
    Bool,
}

impl ScalarType {
    pub(crate) fn wire_name(self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Number => "number",
            ScalarType::Bool => "bool",
        }
    }
}

/// The type of an attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    /// A string value.
    String,
    /// A numeric value.
    Number,
    /// A boolean value.
    Bool,
    /// A value of any shape, transported with a structural type descriptor.
    Any,
    /// An array of scalar values.
    Array(ScalarType),
    /// A scalar refined by provider-side conversion; compiles and validates
    /// as its underlying scalar type.
    Custom(ScalarType),
    /// A single nested object with its own field map.
    Object(Fields),
    /// A list of nested objects sharing one field map.
    List(Fields),
}

/// Who supplies an attribute's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// The practitioner must supply the value.
    Required,
    /// The practitioner may supply the value.
    Optional,
    /// The provider supplies the value; it may be absent in state.
    Computed,
    /// The practitioner may supply the value, otherwise the provider does.
    ComputedIfNotGiven,
    /// The provider always supplies the value.
    RequiredToBeComputed,
}

impl Presence {
    /// Whether the plan engine substitutes a value for this presence when the
    /// proposed state leaves it null.
    pub(crate) fn plans_computed(self) -> bool {
        match self {
            Presence::Computed | Presence::ComputedIfNotGiven | Presence::RequiredToBeComputed => {
                true
            }
            Presence::Optional | Presence::Required => false,
        }
    }
}

/// A single attribute in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// The type of the attribute.
    #[serde(rename = "type")]
    pub attr_type: AttrType,
    /// Who supplies the attribute's value.
    pub presence: Presence,
    /// Human-readable description of the attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// If set, changing this attribute forces the resource to be replaced.
    #[serde(default)]
    pub requires_replacement: bool,
}

impl Attribute {
    /// Create a new attribute with the given type and presence.
    pub fn new(attr_type: AttrType, presence: Presence) -> Self {
        Self {
            attr_type,
            presence,
            description: None,
            requires_replacement: false,
        }
    }

    /// Create a required string attribute.
    pub fn required_string() -> Self {
        Self::new(AttrType::String, Presence::Required)
    }

    /// Create an optional string attribute.
    pub fn optional_string() -> Self {
        Self::new(AttrType::String, Presence::Optional)
    }

    /// Create a computed string attribute.
    pub fn computed_string() -> Self {
        Self::new(AttrType::String, Presence::Computed)
    }

    /// Create a required number attribute.
    pub fn required_number() -> Self {
        Self::new(AttrType::Number, Presence::Required)
    }

    /// Create an optional number attribute.
    pub fn optional_number() -> Self {
        Self::new(AttrType::Number, Presence::Optional)
    }

    /// Create a computed number attribute.
    pub fn computed_number() -> Self {
        Self::new(AttrType::Number, Presence::Computed)
    }

    /// Create a required bool attribute.
    pub fn required_bool() -> Self {
        Self::new(AttrType::Bool, Presence::Required)
    }

    /// Create an optional bool attribute.
    pub fn optional_bool() -> Self {
        Self::new(AttrType::Bool, Presence::Optional)
    }

    /// Create a computed bool attribute.
    pub fn computed_bool() -> Self {
        Self::new(AttrType::Bool, Presence::Computed)
    }

    /// Create a required dynamically-typed attribute.
    pub fn required_any() -> Self {
        Self::new(AttrType::Any, Presence::Required)
    }

    /// Set the description for this attribute.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark this attribute as forcing resource replacement when changed.
    pub fn with_requires_replacement(mut self) -> Self {
        self.requires_replacement = true;
        self
    }
}

/// An exactly-one-of-many field: a sequence of alternative field maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Union {
    /// The alternative field maps. A configuration is valid for the union if
    /// it validates cleanly against at least one of them.
    pub alternatives: Vec<Fields>,
}

impl Union {
    /// Create a union over the given alternatives.
    pub fn new(alternatives: impl IntoIterator<Item = Fields>) -> Self {
        Self {
            alternatives: alternatives.into_iter().collect(),
        }
    }

    /// If every alternative consists of exactly one required attribute,
    /// returns those attribute names. Used to collapse validation failures
    /// into a single "requires one of" message.
    pub fn single_required_field_names(&self) -> Option<Vec<&str>> {
        let mut names = Vec::with_capacity(self.alternatives.len());
        for alternative in &self.alternatives {
            if alternative.len() != 1 {
                return None;
            }
            let (name, field) = alternative.iter().next()?;
            match field {
                Field::Attr(attr) if attr.presence == Presence::Required => {
                    names.push(name.as_str())
                }
                Field::Attr(_) | Field::Union(_) => return None,
            }
        }
        Some(names)
    }
}

/// A named entry in a schema: a plain attribute or a union of alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field {
    /// A plain attribute.
    Attr(Attribute),
    /// A union of alternative field maps.
    Union(Union),
}

/// A mapping from field names to schema entries.
pub type Fields = BTreeMap<String, Field>;

/// Build a field map from plain attributes.
pub fn fields<K, I>(pairs: I) -> Fields
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Attribute)>,
{
    pairs
        .into_iter()
        .map(|(name, attr)| (name.into(), Field::Attr(attr)))
        .collect()
}

/// Schema for a provider, resource, or data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Schema {
    /// The top-level field map.
    pub attributes: Fields,
    /// Human-readable description of the schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Schema {
    /// Create a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute to the schema.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), Field::Attr(attr));
        self
    }

    /// Add a union field to the schema.
    pub fn with_union(mut self, name: impl Into<String>, union: Union) -> Self {
        self.attributes.insert(name.into(), Field::Union(union));
        self
    }

    /// Set the description for this schema.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Compile this schema to its wire representation.
    ///
    /// Union alternatives flatten into the surrounding attribute list; the
    /// compilation is lossy and one-way.
    pub fn to_proto(&self) -> proto::Schema {
        proto::Schema {
            version: 0,
            block: Some(proto::schema::Block {
                attributes: attribute_list_from(&self.attributes, false),
                description: self.description.clone().unwrap_or_default(),
            }),
        }
    }
}

/// Walk a field map, flattening unions transitively, and visit every concrete
/// attribute as `(name, attribute, inside_union)`.
///
/// The codec, the plan engine, and the schema compiler all traverse fields
/// through this single function so they cannot drift in how union
/// alternatives are interpreted.
pub(crate) fn flatten_fields<'a>(
    fields: &'a Fields,
    inside_union: bool,
    visit: &mut dyn FnMut(&'a str, &'a Attribute, bool),
) {
    for (name, field) in fields {
        match field {
            Field::Attr(attr) => visit(name, attr, inside_union),
            Field::Union(union) => {
                for alternative in &union.alternatives {
                    flatten_fields(alternative, true, visit);
                }
            }
        }
    }
}

pub(crate) fn attribute_list_from(
    fields: &Fields,
    inside_union: bool,
) -> Vec<proto::schema::Attribute> {
    let mut attributes = Vec::new();
    flatten_fields(fields, inside_union, &mut |name, attr, in_union| {
        attributes.push(attribute_to_proto(name, attr, in_union));
    });
    attributes
}

fn attribute_to_proto(name: &str, attr: &Attribute, inside_union: bool) -> proto::schema::Attribute {
    let (required, optional, computed) = wire_presence(attr.presence, inside_union);
    let (wire_type, nested_type) = wire_type(&attr.attr_type);
    proto::schema::Attribute {
        name: name.to_string(),
        r#type: wire_type,
        nested_type,
        description: attr.description.clone().unwrap_or_default(),
        required,
        optional,
        computed,
        ..Default::default()
    }
}

fn wire_presence(presence: Presence, inside_union: bool) -> (bool, bool, bool) {
    match presence {
        Presence::Computed | Presence::RequiredToBeComputed => (false, false, true),
        Presence::ComputedIfNotGiven => (false, true, true),
        Presence::Optional => (false, true, false),
        Presence::Required => {
            if inside_union {
                (false, true, false)
            } else {
                (true, false, false)
            }
        }
    }
}

fn wire_type(attr_type: &AttrType) -> (Vec<u8>, Option<proto::schema::Object>) {
    match attr_type {
        AttrType::String => (type_bytes(&serde_json::json!("string")), None),
        AttrType::Number => (type_bytes(&serde_json::json!("number")), None),
        AttrType::Bool => (type_bytes(&serde_json::json!("bool")), None),
        AttrType::Any => (type_bytes(&serde_json::json!("dynamic")), None),
        AttrType::Array(item) => (
            type_bytes(&serde_json::json!(["list", item.wire_name()])),
            None,
        ),
        AttrType::Custom(underlying) => {
            (type_bytes(&serde_json::json!(underlying.wire_name())), None)
        }
        AttrType::Object(fields) => (
            Vec::new(),
            Some(nested_object(fields, proto::schema::object::NestingMode::Single)),
        ),
        AttrType::List(fields) => (
            Vec::new(),
            Some(nested_object(fields, proto::schema::object::NestingMode::List)),
        ),
    }
}

fn type_bytes(value: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn nested_object(
    fields: &Fields,
    nesting: proto::schema::object::NestingMode,
) -> proto::schema::Object {
    proto::schema::Object {
        attributes: attribute_list_from(fields, false),
        nesting: nesting as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(schema: &Schema) -> Vec<proto::schema::Attribute> {
        schema.to_proto().block.unwrap().attributes
    }

    #[test]
    fn test_wire_presence_outside_union() {
        assert_eq!(wire_presence(Presence::Required, false), (true, false, false));
        assert_eq!(wire_presence(Presence::Optional, false), (false, true, false));
        assert_eq!(wire_presence(Presence::Computed, false), (false, false, true));
        assert_eq!(
            wire_presence(Presence::ComputedIfNotGiven, false),
            (false, true, true)
        );
        assert_eq!(
            wire_presence(Presence::RequiredToBeComputed, false),
            (false, false, true)
        );
    }

    #[test]
    fn test_wire_presence_inside_union() {
        assert_eq!(wire_presence(Presence::Required, true), (false, true, false));
        assert_eq!(wire_presence(Presence::Optional, true), (false, true, false));
        assert_eq!(wire_presence(Presence::Computed, true), (false, false, true));
        assert_eq!(
            wire_presence(Presence::ComputedIfNotGiven, true),
            (false, true, true)
        );
        assert_eq!(
            wire_presence(Presence::RequiredToBeComputed, true),
            (false, false, true)
        );
    }

    #[test]
    fn test_primitive_wire_types() {
        let schema = Schema::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("count", Attribute::optional_number())
            .with_attribute("enabled", Attribute::optional_bool())
            .with_attribute("metadata", Attribute::required_any());

        let attrs = compiled(&schema);
        let by_name = |name: &str| attrs.iter().find(|a| a.name == name).unwrap();

        assert_eq!(by_name("name").r#type, b"\"string\"");
        assert_eq!(by_name("count").r#type, b"\"number\"");
        assert_eq!(by_name("enabled").r#type, b"\"bool\"");
        assert_eq!(by_name("metadata").r#type, b"\"dynamic\"");
    }

    #[test]
    fn test_array_and_custom_wire_types() {
        let schema = Schema::new()
            .with_attribute(
                "tags",
                Attribute::new(AttrType::Array(ScalarType::String), Presence::Optional),
            )
            .with_attribute(
                "did",
                Attribute::new(AttrType::Custom(ScalarType::String), Presence::Required),
            );

        let attrs = compiled(&schema);
        let by_name = |name: &str| attrs.iter().find(|a| a.name == name).unwrap();

        assert_eq!(by_name("tags").r#type, b"[\"list\",\"string\"]");
        assert_eq!(by_name("did").r#type, b"\"string\"");
    }

    #[test]
    fn test_object_and_list_nesting() {
        let schema = Schema::new()
            .with_attribute(
                "endpoint",
                Attribute::new(
                    AttrType::Object(fields([("host", Attribute::required_string())])),
                    Presence::Required,
                ),
            )
            .with_attribute(
                "rules",
                Attribute::new(
                    AttrType::List(fields([("port", Attribute::required_number())])),
                    Presence::Optional,
                ),
            );

        let attrs = compiled(&schema);
        let by_name = |name: &str| attrs.iter().find(|a| a.name == name).unwrap();

        let endpoint = by_name("endpoint");
        assert!(endpoint.r#type.is_empty());
        let nested = endpoint.nested_type.as_ref().unwrap();
        assert_eq!(nested.nesting, proto::schema::object::NestingMode::Single as i32);
        assert_eq!(nested.attributes.len(), 1);
        assert_eq!(nested.attributes[0].name, "host");
        assert!(nested.attributes[0].required);

        let rules = by_name("rules");
        let nested = rules.nested_type.as_ref().unwrap();
        assert_eq!(nested.nesting, proto::schema::object::NestingMode::List as i32);
        assert_eq!(nested.attributes[0].name, "port");
    }

    #[test]
    fn test_union_flattens_into_parent() {
        let schema = Schema::new().with_union(
            "handle",
            Union::new([
                fields([("did", Attribute::required_string())]),
                fields([("alias", Attribute::required_string())]),
            ]),
        );

        let attrs = compiled(&schema);
        assert_eq!(attrs.len(), 2);
        for attr in &attrs {
            // Required inside a union surfaces as optional on the wire.
            assert!(!attr.required);
            assert!(attr.optional);
            assert!(!attr.computed);
        }
        let names: Vec<_> = attrs.iter().map(|a| a.name.as_str()).collect();
        assert!(names.contains(&"did"));
        assert!(names.contains(&"alias"));
    }

    #[test]
    fn test_union_flattens_transitively() {
        let mut inner_alt = Fields::new();
        inner_alt.insert(
            "token".to_string(),
            Field::Attr(Attribute::required_string()),
        );
        let mut outer_alt = Fields::new();
        outer_alt.insert("auth".to_string(), Field::Union(Union::new([inner_alt])));

        let schema = Schema::new().with_union(
            "credentials",
            Union::new([outer_alt, fields([("password", Attribute::required_string())])]),
        );

        let attrs = compiled(&schema);
        let names: Vec<_> = attrs.iter().map(|a| a.name.as_str()).collect();
        assert!(names.contains(&"token"));
        assert!(names.contains(&"password"));
        assert_eq!(attrs.len(), 2);
    }

    #[test]
    fn test_nested_fields_inside_union_are_not_union_scoped() {
        let schema = Schema::new().with_union(
            "target",
            Union::new([fields([(
                "endpoint",
                Attribute::new(
                    AttrType::Object(fields([("host", Attribute::required_string())])),
                    Presence::Required,
                ),
            )])]),
        );

        let attrs = compiled(&schema);
        let endpoint = &attrs[0];
        assert!(endpoint.optional);
        let nested = endpoint.nested_type.as_ref().unwrap();
        // The union only relaxes its direct alternatives, not their children.
        assert!(nested.attributes[0].required);
    }

    #[test]
    fn test_single_required_field_names() {
        let union = Union::new([
            fields([("a", Attribute::required_string())]),
            fields([("b", Attribute::required_number())]),
        ]);
        assert_eq!(union.single_required_field_names(), Some(vec!["a", "b"]));

        let union = Union::new([
            fields([("a", Attribute::required_string())]),
            fields([("b", Attribute::optional_string())]),
        ]);
        assert_eq!(union.single_required_field_names(), None);

        let union = Union::new([fields([
            ("a", Attribute::required_string()),
            ("b", Attribute::required_string()),
        ])]);
        assert_eq!(union.single_required_field_names(), None);
    }

    #[test]
    fn test_attribute_builders() {
        let attr = Attribute::required_string()
            .with_description("The record key")
            .with_requires_replacement();

        assert_eq!(attr.attr_type, AttrType::String);
        assert_eq!(attr.presence, Presence::Required);
        assert_eq!(attr.description.as_deref(), Some("The record key"));
        assert!(attr.requires_replacement);
    }

    #[test]
    fn test_description_lands_on_wire() {
        let schema = Schema::new()
            .with_attribute(
                "name",
                Attribute::required_string().with_description("Display name"),
            )
            .with_description("A status record");

        let proto = schema.to_proto();
        let block = proto.block.unwrap();
        assert_eq!(block.description, "A status record");
        assert_eq!(block.attributes[0].description, "Display name");
    }
}
