use std::collections::HashMap;

use super::types::{Asset, AssetType, MemberId};

pub const SAVINGS_GROWTH_RATE: f64 = 0.01;

/// Working set of assets for one projection run.
///
/// Keeps insertion order for reporting and an id index so synthetic
/// per-member entries can be found or created without scanning.
#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    assets: Vec<Asset>,
    index: HashMap<String, usize>,
}

impl AssetStore {
    pub fn new(assets: Vec<Asset>) -> Self {
        let mut store = Self::default();
        for asset in assets {
            store.push(asset);
        }
        store
    }

    /// Appends `asset`. A duplicate id keeps its position in iteration but
    /// only the first entry is reachable by id.
    pub fn push(&mut self, asset: Asset) -> usize {
        let position = self.assets.len();
        self.index.entry(asset.id.clone()).or_insert(position);
        self.assets.push(asset);
        position
    }

    pub fn get(&self, id: &str) -> Option<&Asset> {
        let position = *self.index.get(id)?;
        Some(&self.assets[position])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Asset> {
        let position = *self.index.get(id)?;
        Some(&mut self.assets[position])
    }

    pub fn find_or_insert_with(&mut self, id: &str, make: impl FnOnce() -> Asset) -> &mut Asset {
        let existing = self.index.get(id).copied();
        let position = match existing {
            Some(position) => position,
            None => self.push(make()),
        };
        &mut self.assets[position]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Asset> {
        self.assets.iter_mut()
    }

    pub fn as_slice(&self) -> &[Asset] {
        &self.assets
    }

    pub fn at_mut(&mut self, position: usize) -> &mut Asset {
        &mut self.assets[position]
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn total_value(&self) -> f64 {
        self.assets.iter().map(|asset| asset.value).sum()
    }
}

pub fn savings_asset_id(member_id: &str) -> String {
    format!("generated-savings-{member_id}")
}

pub fn debt_asset_id(member_id: &str) -> String {
    format!("generated-debt-{member_id}")
}

pub fn new_savings_asset(member_id: &MemberId, member_name: &str) -> Asset {
    Asset {
        id: savings_asset_id(member_id),
        name: format!("Other Investments ({})", display_name(member_id, member_name)),
        asset_type: AssetType::Other,
        value: 0.0,
        owners: vec![member_id.clone()],
        purchase_value: 0.0,
        is_main_residence: false,
        growth_rate: Some(SAVINGS_GROWTH_RATE),
        cadastral_value: None,
        is_foreign_asset: false,
    }
}

pub fn new_debt_asset(member_id: &MemberId, member_name: &str) -> Asset {
    Asset {
        id: debt_asset_id(member_id),
        name: format!("Accumulated Debt ({})", display_name(member_id, member_name)),
        asset_type: AssetType::Other,
        value: 0.0,
        owners: vec![member_id.clone()],
        purchase_value: 0.0,
        is_main_residence: false,
        growth_rate: Some(0.0),
        cadastral_value: None,
        is_foreign_asset: false,
    }
}

fn display_name<'a>(member_id: &'a str, member_name: &'a str) -> &'a str {
    if member_name.trim().is_empty() {
        member_id
    } else {
        member_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cash(id: &str, value: f64) -> Asset {
        Asset {
            id: id.to_string(),
            name: format!("Cash {id}"),
            asset_type: AssetType::Cash,
            value,
            owners: vec!["1".to_string()],
            purchase_value: value,
            is_main_residence: false,
            growth_rate: None,
            cadastral_value: None,
            is_foreign_asset: false,
        }
    }

    #[test]
    fn find_or_insert_creates_once() {
        let mut store = AssetStore::new(vec![cash("a", 10.0)]);
        let member = "1".to_string();

        store
            .find_or_insert_with(&savings_asset_id(&member), || new_savings_asset(&member, "Ane"))
            .value += 100.0;
        store
            .find_or_insert_with(&savings_asset_id(&member), || new_savings_asset(&member, "Ane"))
            .value += 50.0;

        assert_eq!(store.len(), 2);
        let savings = store.get("generated-savings-1").expect("savings asset exists");
        assert_eq!(savings.value, 150.0);
        assert_eq!(savings.name, "Other Investments (Ane)");
        assert_eq!(savings.growth_rate, Some(SAVINGS_GROWTH_RATE));
    }

    #[test]
    fn iteration_keeps_insertion_order() {
        let mut store = AssetStore::new(vec![cash("b", 1.0), cash("a", 2.0)]);
        let member = "7".to_string();
        store.find_or_insert_with(&debt_asset_id(&member), || new_debt_asset(&member, ""));

        let ids: Vec<&str> = store.iter().map(|asset| asset.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "generated-debt-7"]);
        assert_eq!(
            store.get("generated-debt-7").map(|asset| asset.name.as_str()),
            Some("Accumulated Debt (7)")
        );
        assert_eq!(store.total_value(), 3.0);
    }
}
