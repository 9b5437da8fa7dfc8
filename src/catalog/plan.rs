use serde::Serialize;
use serde_json::{Map, Value};

use crate::config;

use super::feature::{Feature, FeatureRef, FeatureView};

/// key: catalog-plan -> priced bundle of features
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    id: String,
    yearly_id: Option<String>,
    name: String,
    description: Option<String>,
    price: f64,
    yearly_price: f64,
    currency: String,
    active: bool,
    data: Map<String, Value>,
    features: Vec<Feature>,
}

impl Plan {
    pub fn new(name: impl Into<String>, id: impl Into<String>, yearly_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            yearly_id,
            name: name.into(),
            description: None,
            price: 0.0,
            yearly_price: 0.0,
            currency: config::DEFAULT_CURRENCY.clone(),
            active: true,
            data: Map::new(),
            features: Vec::new(),
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = Some(description.into());
        self
    }

    pub fn yearly_id(&mut self, yearly_id: impl Into<String>) -> &mut Self {
        self.yearly_id = Some(yearly_id.into());
        self
    }

    /// Sets the monthly price; keeps the current currency when `currency` is `None`.
    pub fn price(&mut self, price: f64, currency: Option<&str>) -> &mut Self {
        self.price = price;
        if let Some(currency) = currency {
            self.currency = currency.to_string();
        }
        self
    }

    pub fn monthly(&mut self, price: f64, currency: Option<&str>) -> &mut Self {
        self.price(price, currency)
    }

    pub fn yearly(&mut self, price: f64) -> &mut Self {
        self.yearly_price = price;
        self
    }

    pub fn data(&mut self, data: Map<String, Value>) -> &mut Self {
        self.data = data;
        self
    }

    pub fn popular(&mut self) -> &mut Self {
        self.data.insert("popular".to_string(), Value::Bool(true));
        self
    }

    pub fn archive(&mut self) -> &mut Self {
        self.active = false;
        self
    }

    pub fn deprecated(&mut self) -> &mut Self {
        self.archive()
    }

    /// Replaces the feature set. Duplicate ids keep their first occurrence.
    pub fn features(&mut self, features: Vec<Feature>) -> &mut Self {
        self.features = dedup_by_id(features);
        self
    }

    /// Merges `overrides`, then the parent's features, then this plan's own
    /// features. The first feature seen for an id wins, so overrides shadow
    /// whatever the parent grants.
    pub fn inherit_features_from_plan(
        &mut self,
        parent: &Plan,
        overrides: Vec<Feature>,
    ) -> &mut Self {
        let own = std::mem::take(&mut self.features);
        let merged = overrides
            .into_iter()
            .chain(parent.features.iter().cloned())
            .chain(own)
            .collect();
        self.features = dedup_by_id(merged);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get_yearly_id(&self) -> Option<&str> {
        self.yearly_id.as_deref()
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn get_price(&self) -> f64 {
        self.price
    }

    pub fn get_monthly_price(&self) -> f64 {
        self.price
    }

    pub fn get_yearly_price(&self) -> f64 {
        self.yearly_price
    }

    pub fn get_currency(&self) -> &str {
        &self.currency
    }

    pub fn get_data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// True when `id` is either the primary or the yearly id.
    pub fn answers_to(&self, id: &str) -> bool {
        self.id == id || self.yearly_id.as_deref() == Some(id)
    }

    pub fn get_features(&self) -> &[Feature] {
        &self.features
    }

    pub fn get_feature<'a>(&self, feature: impl Into<FeatureRef<'a>>) -> Option<&Feature> {
        let id = feature.into().id();
        self.features.iter().find(|candidate| candidate.id() == id)
    }

    pub fn get_metered_features(&self) -> Vec<&Feature> {
        self.features
            .iter()
            .filter(|feature| feature.is_metered())
            .collect()
    }

    pub fn to_view(&self) -> PlanView {
        PlanView {
            id: self.id.clone(),
            yearly_id: self.yearly_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            monthly_price: self.price,
            yearly_price: self.yearly_price,
            currency: self.currency.clone(),
            active: self.active,
            data: self.data.clone(),
            features: self.features.iter().map(Feature::to_view).collect(),
        }
    }
}

fn dedup_by_id(features: Vec<Feature>) -> Vec<Feature> {
    let mut merged: Vec<Feature> = Vec::with_capacity(features.len());
    for feature in features {
        if merged.iter().any(|existing| existing.id() == feature.id()) {
            continue;
        }
        merged.push(feature);
    }
    merged
}

/// Either a plan id (primary or yearly) or a plan handle.
#[derive(Debug, Clone, Copy)]
pub enum PlanRef<'a> {
    Id(&'a str),
    Plan(&'a Plan),
}

impl<'a> From<&'a str> for PlanRef<'a> {
    fn from(id: &'a str) -> Self {
        PlanRef::Id(id)
    }
}

impl<'a> From<&'a String> for PlanRef<'a> {
    fn from(id: &'a String) -> Self {
        PlanRef::Id(id.as_str())
    }
}

impl<'a> From<&'a Plan> for PlanRef<'a> {
    fn from(plan: &'a Plan) -> Self {
        PlanRef::Plan(plan)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlanView {
    pub id: String,
    pub yearly_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub monthly_price: f64,
    pub yearly_price: f64,
    pub currency: String,
    pub active: bool,
    pub data: Map<String, Value>,
    pub features: Vec<FeatureView>,
}
