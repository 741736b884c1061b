use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::coerce;
use crate::error::CoreError;
use crate::field_value::TypedValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FieldType {
    Text,
    Choice,
    MultiChoice,
    Numeric { scale: u32 },
    StructuredList,
    Boolean,
}

/// Extra validation applied on top of the field type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoercionRule {
    /// http(s) URL, hostname, `localhost` or IPv4, optional port and path.
    Url,
    /// Every item must look like `CVE-YYYY-NNNN`.
    CveIds,
    /// Structured-list records: each must carry at least one of
    /// `required_any`, and listed keys must hold one of their options.
    Records {
        required_any: Vec<String>,
        enumerated: Vec<(String, Vec<String>)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    /// Allowed values for `Choice` and `MultiChoice`. Empty means unrestricted.
    pub options: Vec<String>,
    pub protected: bool,
    pub rule: Option<CoercionRule>,
}

impl FieldDescriptor {
    fn of(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            options: Vec::new(),
            protected: false,
            rule: None,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::of(name, FieldType::Text)
    }

    pub fn choice(name: &str, options: &[&str]) -> Self {
        Self::of(name, FieldType::Choice).with_options(options)
    }

    pub fn multi_choice(name: &str) -> Self {
        Self::of(name, FieldType::MultiChoice)
    }

    pub fn numeric(name: &str, scale: u32) -> Self {
        Self::of(name, FieldType::Numeric { scale })
    }

    pub fn structured_list(name: &str) -> Self {
        Self::of(name, FieldType::StructuredList)
    }

    pub fn boolean(name: &str) -> Self {
        Self::of(name, FieldType::Boolean)
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn with_rule(mut self, rule: CoercionRule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.protected = true;
        self
    }
}

/// Field name → type and validation rules.
pub trait FieldRegistry: Send + Sync {
    fn describe(&self, name: &str) -> Option<&FieldDescriptor>;

    fn descriptors(&self) -> Vec<&FieldDescriptor>;

    /// Look up a field that editors are allowed to override.
    fn check_editable(&self, name: &str) -> Result<&FieldDescriptor, CoreError> {
        let descriptor = self
            .describe(name)
            .ok_or_else(|| CoreError::UnknownField(name.to_string()))?;
        if descriptor.protected {
            return Err(CoreError::ProtectedField(name.to_string()));
        }
        Ok(descriptor)
    }

    fn coerce(&self, name: &str, raw: &str) -> Result<TypedValue, CoreError> {
        let descriptor = self
            .describe(name)
            .ok_or_else(|| CoreError::UnknownField(name.to_string()))?;
        coerce::coerce(descriptor, raw)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    fields: BTreeMap<String, FieldDescriptor>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, descriptor: FieldDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    pub fn insert(&mut self, descriptor: FieldDescriptor) {
        self.fields.insert(descriptor.name.clone(), descriptor);
    }

    /// The device catalog's editable attribute set.
    pub fn device_catalog() -> Self {
        Self::new()
            .with(FieldDescriptor::text("vendor"))
            .with(FieldDescriptor::text("model"))
            .with(FieldDescriptor::text("category"))
            .with(FieldDescriptor::text("device_type"))
            .with(FieldDescriptor::text("cps_vector"))
            .with(FieldDescriptor::choice("is_eol", &["Active", "EOL"]))
            .with(FieldDescriptor::choice(
                "patching_responsibility",
                &["Vendor", "User", "Shared"],
            ))
            .with(FieldDescriptor::multi_choice("potential_cves").with_rule(CoercionRule::CveIds))
            .with(FieldDescriptor::text("links").with_rule(CoercionRule::Url))
            .with(FieldDescriptor::text("image_url").with_rule(CoercionRule::Url))
            .with(
                FieldDescriptor::structured_list("certified_patches").with_rule(
                    CoercionRule::Records {
                        required_any: vec!["kb".into(), "link".into()],
                        enumerated: Vec::new(),
                    },
                ),
            )
            .with(
                FieldDescriptor::structured_list("pre_installed_applications").with_rule(
                    CoercionRule::Records {
                        required_any: vec!["app".into()],
                        enumerated: vec![(
                            "relevance".into(),
                            vec!["Relevant".into(), "Irrelevant".into()],
                        )],
                    },
                ),
            )
            .with(FieldDescriptor::numeric("risk_score", 1))
            .with(FieldDescriptor::boolean("needs_vector"))
            .with(FieldDescriptor::text("created_at").read_only())
            .with(FieldDescriptor::text("updated_at").read_only())
    }
}

impl FieldRegistry for FieldTable {
    fn describe(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    fn descriptors(&self) -> Vec<&FieldDescriptor> {
        self.fields.values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_and_protected_fields_are_not_editable() {
        let table = FieldTable::device_catalog();
        assert!(matches!(
            table.check_editable("colour"),
            Err(CoreError::UnknownField(name)) if name == "colour"
        ));
        assert!(matches!(
            table.check_editable("created_at"),
            Err(CoreError::ProtectedField(_))
        ));
        assert_eq!(table.check_editable("vendor").unwrap().name, "vendor");
    }

    #[test]
    fn coerce_dispatches_on_descriptor() {
        let table = FieldTable::device_catalog();
        assert_eq!(
            table.coerce("risk_score", "7.25").unwrap().to_canonical(),
            "7.3"
        );
        assert!(table.coerce("is_eol", "Retired").is_err());
        assert!(matches!(
            table.coerce("nope", "x"),
            Err(CoreError::UnknownField(_))
        ));
    }

    #[test]
    fn descriptors_are_sorted_by_name() {
        let table = FieldTable::new()
            .with(FieldDescriptor::text("b"))
            .with(FieldDescriptor::boolean("a"));
        let names: Vec<_> = table.descriptors().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
