use serde::Serialize;

use crate::config;

/// key: catalog-item -> one-off priced line item, optionally a bundle
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    id: String,
    name: String,
    price: f64,
    currency: String,
    subitems: Vec<Item>,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        price: f64,
        currency: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            currency: currency
                .map(str::to_string)
                .unwrap_or_else(|| config::DEFAULT_CURRENCY.clone()),
            subitems: Vec::new(),
        }
    }

    /// Attaches bundled items, keeping the first item seen for each id.
    pub fn subitems(&mut self, subitems: Vec<Item>) -> &mut Self {
        let mut unique: Vec<Item> = Vec::with_capacity(subitems.len());
        for item in subitems {
            if unique.iter().all(|existing| existing.id != item.id) {
                unique.push(item);
            }
        }
        self.subitems = unique;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn get_subitems(&self) -> &[Item] {
        &self.subitems
    }

    pub fn to_view(&self) -> ItemView {
        ItemView {
            id: self.id.clone(),
            name: self.name.clone(),
            price: self.price,
            currency: self.currency.clone(),
            subitems: self.subitems.iter().map(Item::to_view).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ItemView {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub currency: String,
    pub subitems: Vec<ItemView>,
}
