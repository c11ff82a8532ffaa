use crate::errors::AutomationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Separator for writing a fallback chain on one line, e.g. `".cat-tab || [role=tab]"`.
/// Commas are already meaningful inside CSS, so they cannot be used here.
pub const FALLBACK_SEPARATOR: &str = "||";

/// Logical UI affordances the automation needs to find on the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    Category,
    MenuItem,
    AddButton,
    Modal,
    CloseButton,
    /// Optional: dedicated price element inside the modal
    PriceLabel,
    /// Optional: required modifier groups inside the modal. Each selector is
    /// one group; the first visible choice of every group is picked.
    AddOn,
    /// Optional: basket counter used to confirm that an add took effect
    CartCount,
}

impl TargetKind {
    pub const REQUIRED: [TargetKind; 5] = [
        TargetKind::Category,
        TargetKind::MenuItem,
        TargetKind::AddButton,
        TargetKind::Modal,
        TargetKind::CloseButton,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Category => "category",
            TargetKind::MenuItem => "menuItem",
            TargetKind::AddButton => "addButton",
            TargetKind::Modal => "modal",
            TargetKind::CloseButton => "closeButton",
            TargetKind::PriceLabel => "priceLabel",
            TargetKind::AddOn => "addOn",
            TargetKind::CartCount => "cartCount",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "category" => Ok(TargetKind::Category),
            "menuitem" | "item" => Ok(TargetKind::MenuItem),
            "addbutton" | "add" => Ok(TargetKind::AddButton),
            "modal" => Ok(TargetKind::Modal),
            "closebutton" | "close" => Ok(TargetKind::CloseButton),
            "pricelabel" | "price" => Ok(TargetKind::PriceLabel),
            "addon" | "addons" => Ok(TargetKind::AddOn),
            "cartcount" | "basketcount" => Ok(TargetKind::CartCount),
            _ => Err(AutomationError::InvalidSelector(format!(
                "Unknown target \"{s}\". Expected one of category, menuItem, addButton, modal, closeButton, priceLabel, addOn, cartCount."
            ))),
        }
    }
}

/// A logical target mapped to an ordered list of selectors.
///
/// Order is priority: the first selector that yields a visible element wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub name: String,
    pub selectors: Vec<String>,
}

impl TargetDescriptor {
    pub fn new<I, S>(name: impl Into<String>, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            selectors: selectors.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse `".a || .b"` into a descriptor with two selectors
    pub fn parse(name: impl Into<String>, chain: &str) -> Self {
        Self::new(name, split_fallbacks(chain))
    }

    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.selectors.is_empty() {
            return Err(AutomationError::InvalidSelector(format!(
                "target '{}' has no selectors",
                self.name
            )));
        }
        if let Some(pos) = self.selectors.iter().position(|s| s.trim().is_empty()) {
            return Err(AutomationError::InvalidSelector(format!(
                "target '{}' has an empty selector at position {pos}",
                self.name
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}]",
            self.name,
            self.selectors.join(&format!(" {FALLBACK_SEPARATOR} "))
        )
    }
}

fn split_fallbacks(chain: &str) -> Vec<String> {
    chain
        .split(FALLBACK_SEPARATOR)
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// The full selector configuration for one target site.
///
/// Serialized as `{"category": [".tab", ...], "menuItem": [...], ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<TargetKind, Vec<String>>",
    into = "BTreeMap<TargetKind, Vec<String>>"
)]
pub struct TargetSet {
    targets: BTreeMap<TargetKind, TargetDescriptor>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, S>(mut self, kind: TargetKind, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(kind, selectors);
        self
    }

    pub fn insert<I, S>(&mut self, kind: TargetKind, selectors: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets
            .insert(kind, TargetDescriptor::new(kind.as_str(), selectors));
    }

    pub fn get(&self, kind: TargetKind) -> Option<&TargetDescriptor> {
        self.targets.get(&kind)
    }

    /// Like [`get`](Self::get) but a missing target is an error
    pub fn require(&self, kind: TargetKind) -> Result<&TargetDescriptor, AutomationError> {
        self.targets.get(&kind).ok_or_else(|| {
            AutomationError::InvalidSelector(format!("no selectors configured for '{kind}'"))
        })
    }

    pub fn validate(&self) -> Result<(), AutomationError> {
        for kind in TargetKind::REQUIRED {
            self.require(kind)?.validate()?;
        }
        for optional in [TargetKind::PriceLabel, TargetKind::AddOn, TargetKind::CartCount] {
            if let Some(d) = self.targets.get(&optional) {
                d.validate()?;
            }
        }
        Ok(())
    }
}

impl From<BTreeMap<TargetKind, Vec<String>>> for TargetSet {
    fn from(map: BTreeMap<TargetKind, Vec<String>>) -> Self {
        let targets = map
            .into_iter()
            .map(|(kind, selectors)| (kind, TargetDescriptor::new(kind.as_str(), selectors)))
            .collect();
        Self { targets }
    }
}

impl From<TargetSet> for BTreeMap<TargetKind, Vec<String>> {
    fn from(set: TargetSet) -> Self {
        set.targets
            .into_iter()
            .map(|(kind, d)| (kind, d.selectors))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fallback_chain_in_order() {
        let d = TargetDescriptor::parse("addButton", " .missing ||.present|| button[data-add] ");
        assert_eq!(d.selectors, vec![".missing", ".present", "button[data-add]"]);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn empty_descriptor_is_rejected() {
        let d = TargetDescriptor::new("modal", Vec::<String>::new());
        assert!(matches!(
            d.validate(),
            Err(AutomationError::InvalidSelector(_))
        ));
    }

    #[test]
    fn target_kind_accepts_loose_spelling() {
        assert_eq!("menu-item".parse::<TargetKind>().unwrap(), TargetKind::MenuItem);
        assert_eq!("CLOSE_BUTTON".parse::<TargetKind>().unwrap(), TargetKind::CloseButton);
        assert_eq!("add_on".parse::<TargetKind>().unwrap(), TargetKind::AddOn);
        assert_eq!("basket-count".parse::<TargetKind>().unwrap(), TargetKind::CartCount);
        assert!("sidebar".parse::<TargetKind>().is_err());
    }

    #[test]
    fn target_set_json_shape() {
        let json = r#"{
            "category": [".cat"],
            "menuItem": [".item", "li.product"],
            "addButton": [".add"],
            "modal": [".modal"],
            "closeButton": [".close"]
        }"#;
        let set: TargetSet = serde_json::from_str(json).unwrap();
        set.validate().unwrap();
        assert_eq!(
            set.get(TargetKind::MenuItem).unwrap().selectors,
            vec![".item", "li.product"]
        );
        assert_eq!(set.get(TargetKind::MenuItem).unwrap().name, "menuItem");

        let back = serde_json::to_value(&set).unwrap();
        assert_eq!(back["addButton"][0], ".add");
    }

    #[test]
    fn missing_required_target_fails_validation() {
        let set = TargetSet::new()
            .with(TargetKind::Category, [".cat"])
            .with(TargetKind::MenuItem, [".item"]);
        let err = set.validate().unwrap_err().to_string();
        assert!(err.contains("addButton"), "unexpected error: {err}");
    }

    #[test]
    fn optional_targets_are_validated_when_present() {
        let json = r#"{
            "category": [".cat"], "menuItem": [".item"], "addButton": [".add"],
            "modal": [".modal"], "closeButton": [".close"],
            "addOn": ["[data-class=cooking] .choice", " "]
        }"#;
        let set: TargetSet = serde_json::from_str(json).unwrap();
        assert!(matches!(
            set.validate(),
            Err(AutomationError::InvalidSelector(msg)) if msg.contains("addOn")
        ));
    }
}
