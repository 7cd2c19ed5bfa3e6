//! Query variables and template interpolation.
//!
//! A variable's query may reference the values of strictly earlier
//! variables; resolution is positional. Templates use `{{.name}}`
//! placeholders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The sentinel value selecting the disjunction of all other values.
pub const ALL: &str = "All";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    /// The label whose distinct values become the variable's values.
    #[serde(default)]
    pub label: String,
    /// The query template, interpolated with earlier variables.
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub values: Vec<String>,
    /// The currently selected value.
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub allow_all: bool,
}

impl Variable {
    /// The value substituted during interpolation. `All` becomes the
    /// pipe-joined disjunction of the remaining values.
    pub fn interpolated_value(&self) -> String {
        if self.allow_all && self.value == ALL {
            return self
                .values
                .iter()
                .filter(|v| v.as_str() != ALL)
                .cloned()
                .collect::<Vec<_>>()
                .join("|");
        }

        self.value.clone()
    }

    /// Applies the resolved values: prepends `All` when allowed and selects
    /// the first value when the current selection is empty or no longer
    /// present.
    pub fn set_values(&mut self, values: Vec<String>) {
        self.values = values;
        if self.allow_all {
            self.values.insert(0, ALL.to_string());
        }

        if self.value.is_empty() || !self.values.contains(&self.value) {
            self.value = self.values.first().cloned().unwrap_or_default();
        }
    }
}

/// Interpolates `{{.name}}` placeholders with the values of the given
/// variables. Callers pass only the already-resolved variables, which keeps
/// interpolation strictly positional.
pub fn interpolate(template: &str, variables: &[Variable]) -> String {
    let mut result = template.to_string();
    for variable in variables {
        let value = variable.interpolated_value();
        result = result.replace(&format!("{{{{.{}}}}}", variable.name), &value);
        result = result.replace(&format!("{{{{ .{} }}}}", variable.name), &value);
    }
    result
}

/// Interpolates `{{.label}}` placeholders with a label set. Returns `None`
/// when the template references a label that is not present, so callers can
/// fall back.
pub fn interpolate_labels(template: &str, labels: &BTreeMap<String, String>) -> Option<String> {
    let mut result = template.to_string();
    for (name, value) in labels {
        result = result.replace(&format!("{{{{.{name}}}}}"), value);
        result = result.replace(&format!("{{{{ .{name} }}}}"), value);
    }

    if result.contains("{{") {
        return None;
    }

    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_interpolates_to_disjunction() {
        let mut v1 = Variable {
            name: "v1".into(),
            label: "instance".into(),
            query: r#"up{job="x"}"#.into(),
            allow_all: true,
            ..Default::default()
        };
        v1.set_values(vec!["i1".into(), "i2".into()]);
        assert_eq!(v1.values, vec!["All", "i1", "i2"]);
        assert_eq!(v1.value, "All");

        let interpolated = interpolate(r#"rate(http_total{instance=~"{{.v1}}"}[1m])"#, &[v1]);
        assert_eq!(interpolated, r#"rate(http_total{instance=~"i1|i2"}[1m])"#);
    }

    #[test]
    fn selection_is_kept_when_still_present() {
        let mut variable = Variable {
            name: "pod".into(),
            value: "pod-2".into(),
            ..Default::default()
        };
        variable.set_values(vec!["pod-1".into(), "pod-2".into()]);
        assert_eq!(variable.value, "pod-2");

        variable.set_values(vec!["pod-3".into()]);
        assert_eq!(variable.value, "pod-3");
    }

    #[test]
    fn interpolation_only_uses_given_variables() {
        let v1 = Variable {
            name: "namespace".into(),
            value: "kobs".into(),
            values: vec!["kobs".into()],
            ..Default::default()
        };

        let interpolated = interpolate("up{namespace=\"{{.namespace}}\", pod=\"{{.pod}}\"}", &[v1]);
        assert_eq!(interpolated, "up{namespace=\"kobs\", pod=\"{{.pod}}\"}");
    }

    #[test]
    fn label_interpolation_falls_back_on_missing_labels() {
        let mut labels = BTreeMap::new();
        labels.insert("instance".to_string(), "i1".to_string());

        assert_eq!(
            interpolate_labels("{{.instance}}", &labels).as_deref(),
            Some("i1")
        );
        assert_eq!(interpolate_labels("{{.pod}}", &labels), None);
    }
}
