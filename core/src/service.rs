//! Service attribute model with DIMSE and role selection.
//!
//! Some PS3.4 tables mix the requirements of several DIMSE services and of
//! both SCU and SCP roles in a single table. [`ServiceAttributeModel`]
//! wraps a [`SpecModel`] together with a mapping that says which columns
//! belong to which service, and prunes attributes, column map, and header
//! down to one service and one role.

use std::fmt;
use std::ops::{Deref, DerefMut};

use indexmap::IndexMap;
use snafu::Snafu;
use tracing::{info, warn};

use crate::model::SpecModel;
use crate::node::Value;

/// Mapping key that covers the columns of every DIMSE service.
pub const ALL_DIMSE: &str = "ALL_DIMSE";

/// Per-service mapping from column index to node attribute name.
///
/// Entry order matters: the first entry of a service names the attribute
/// holding the service's optionality requirement.
pub type DimseMapping = IndexMap<String, IndexMap<usize, String>>;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// A role was selected before a specific DIMSE service.
    #[snafu(display("a DIMSE service must be selected before a role"))]
    DimseNotSelected,
}

type Result<T> = std::result::Result<T, Error>;

/// Service Class User or Provider role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    Scu,
    Scp,
}

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRole::Scu => "SCU",
            ServiceRole::Scp => "SCP",
        }
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A specification model for tables with mixed DIMSE and role requirements.
#[derive(Debug, Clone)]
pub struct ServiceAttributeModel {
    model: SpecModel,
    dimse_mapping: DimseMapping,
    dimse: Option<String>,
    role: Option<ServiceRole>,
}

impl ServiceAttributeModel {
    /// Wraps a model with its DIMSE mapping; nothing is selected yet.
    pub fn new(model: SpecModel, dimse_mapping: DimseMapping) -> Self {
        ServiceAttributeModel {
            model,
            dimse_mapping,
            dimse: None,
            role: None,
        }
    }

    /// The currently selected DIMSE service, if any.
    pub fn dimse(&self) -> Option<&str> {
        self.dimse.as_deref()
    }

    /// The currently selected role, if any.
    pub fn role(&self) -> Option<ServiceRole> {
        self.role
    }

    /// Consumes the wrapper and returns the pruned model.
    pub fn into_model(self) -> SpecModel {
        self.model
    }

    /// Restricts the model to the columns of one DIMSE service.
    ///
    /// Node attributes belonging to other services are dropped, and the
    /// header and column map are reduced to the service's columns plus any
    /// column outside the DIMSE mapping. An unknown key logs a warning and
    /// leaves the model untouched.
    pub fn select_dimse(&mut self, dimse: &str) {
        let Some(selected) = self.dimse_mapping.get(dimse) else {
            warn!(dimse, "DIMSE not found in mapping");
            return;
        };
        self.dimse = Some(dimse.to_string());

        let selected_attrs: Vec<String> = selected.values().cloned().collect();
        let selected_columns: Vec<usize> = selected.keys().copied().collect();
        let all = self.dimse_mapping.get(ALL_DIMSE).cloned().unwrap_or_default();
        let all_attrs: Vec<String> = all.values().cloned().collect();
        let all_columns: Vec<usize> = all.keys().copied().collect();

        self.model.content.for_each_mut(&mut |node| {
            node.attrs.retain(|attr, _| {
                !all_attrs.contains(attr) || selected_attrs.contains(attr)
            });
        });

        let header = std::mem::take(&mut self.model.metadata.header);
        self.model.metadata.header = header
            .into_iter()
            .enumerate()
            .filter(|(i, _)| selected_columns.contains(i) || !all_columns.contains(i))
            .map(|(_, cell)| cell)
            .collect();

        self.model
            .metadata
            .column_to_attr
            .retain(|column, attr| {
                selected_attrs.contains(attr) || !all_columns.contains(column)
            });
    }

    /// Restricts the selected DIMSE service to one role.
    ///
    /// The service's optionality values are split on `/` into their
    /// SCU and SCP halves; a trailing newline-separated part becomes a
    /// `comment` attribute with its own column. Header cells mentioning
    /// `SCU/SCP` are rewritten to the selected role.
    pub fn select_role(&mut self, role: ServiceRole) -> Result<()> {
        let dimse = match self.dimse.as_deref() {
            None | Some(ALL_DIMSE) => return Err(Error::DimseNotSelected),
            Some(dimse) => dimse.to_string(),
        };
        self.role = Some(role);

        if matches!(dimse.as_str(), "C-FIND" | "FINAL") {
            info!(dimse = %dimse, "no role-specific requirements");
            return Ok(());
        }

        // The first mapped column of a service holds its optionality.
        let Some(attr_name) = self
            .dimse_mapping
            .get(&dimse)
            .and_then(|columns| columns.values().next())
            .cloned()
        else {
            return Ok(());
        };

        let mut comment_seen = false;
        self.model.content.for_each_mut(&mut |node| {
            let Some(value) = node.attr_str(&attr_name).map(str::to_string) else {
                return;
            };
            let mut parts = value.splitn(2, '\n');
            let optionality = parts.next().unwrap_or("").to_string();
            if let Some(comment) = parts.next() {
                node.set_attr(attr_name.as_str(), Value::Text(optionality.clone()));
                node.set_attr("comment", Value::Text(comment.to_string()));
                comment_seen = true;
            }
            let mut halves = optionality.splitn(2, '/');
            let scu = halves.next().unwrap_or("");
            if let Some(scp) = halves.next() {
                let chosen = match role {
                    ServiceRole::Scu => scu,
                    ServiceRole::Scp => scp,
                };
                node.set_attr(attr_name.as_str(), Value::Text(chosen.to_string()));
            }
        });

        if comment_seen {
            if !self.model.metadata.has_attr("comment") {
                let next = self.model.metadata.next_column();
                self.model
                    .metadata
                    .column_to_attr
                    .insert(next, "comment".to_string());
            }
            if !self.model.metadata.header.iter().any(|h| h == "Comment") {
                self.model.metadata.header.push("Comment".to_string());
            }
        }

        for cell in &mut self.model.metadata.header {
            if cell.contains("SCU/SCP") {
                *cell = cell.replace("SCU/SCP", role.as_str());
            }
        }

        Ok(())
    }
}

impl Deref for ServiceAttributeModel {
    type Target = SpecModel;

    fn deref(&self) -> &Self::Target {
        &self.model
    }
}

impl DerefMut for ServiceAttributeModel {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::node::Node;

    fn ups_style_model() -> ServiceAttributeModel {
        let mut meta = Metadata::default();
        meta.header = vec![
            "Name".into(),
            "N-CREATE (SCU/SCP)".into(),
            "N-SET (SCU/SCP)".into(),
        ];
        meta.column_to_attr.insert(0, "elem_name".into());
        meta.column_to_attr.insert(1, "ncreate".into());
        meta.column_to_attr.insert(2, "nset".into());

        let mut content = Node::new("content");
        let mut node = Node::new("scheduled_station_name");
        node.set_attr("elem_name", Value::from("Scheduled Station Name"));
        node.set_attr("ncreate", Value::from("1/2\nCond"));
        node.set_attr("nset", Value::from("3/3"));
        content.children.push(node);

        let mut mapping = DimseMapping::new();
        let mut all = IndexMap::new();
        all.insert(1, "ncreate".to_string());
        all.insert(2, "nset".to_string());
        mapping.insert(ALL_DIMSE.to_string(), all);
        let mut ncreate = IndexMap::new();
        ncreate.insert(1, "ncreate".to_string());
        mapping.insert("N-CREATE".to_string(), ncreate);

        ServiceAttributeModel::new(SpecModel::new(meta, content), mapping)
    }

    #[test]
    fn dimse_and_role_selection_prunes_and_splits() {
        let mut model = ups_style_model();
        model.select_dimse("N-CREATE");
        model.select_role(ServiceRole::Scu).unwrap();

        let node = &model.content.children[0];
        assert_eq!(node.attr_str("ncreate"), Some("1"));
        assert_eq!(node.attr_str("comment"), Some("Cond"));
        assert!(node.attr("nset").is_none());

        assert_eq!(
            model.metadata.header,
            vec!["Name", "N-CREATE (SCU)", "Comment"]
        );
        let attrs: Vec<_> = model.metadata.column_to_attr.values().cloned().collect();
        assert_eq!(attrs, ["elem_name", "ncreate", "comment"]);
    }

    #[test]
    fn scp_role_takes_the_second_half() {
        let mut model = ups_style_model();
        model.select_dimse("N-CREATE");
        model.select_role(ServiceRole::Scp).unwrap();
        let node = &model.content.children[0];
        assert_eq!(node.attr_str("ncreate"), Some("2"));
    }

    #[test]
    fn role_before_dimse_is_an_error() {
        let mut model = ups_style_model();
        assert!(matches!(
            model.select_role(ServiceRole::Scu),
            Err(Error::DimseNotSelected)
        ));
    }

    #[test]
    fn unknown_dimse_is_a_no_op() {
        let mut model = ups_style_model();
        model.select_dimse("N-ACTION");
        assert!(model.dimse().is_none());
        assert_eq!(model.metadata.header.len(), 3);
    }
}
