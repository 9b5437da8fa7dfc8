use serde::Serialize;
use serde_json::{Map, Value};

/// External billing linkage of a metered feature.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeteringInfo {
    pub metered_id: Option<String>,
    pub unit_price: f64,
    pub unit_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureKind {
    Plain,
    Metered(MeteringInfo),
}

/// key: catalog-feature -> quota definition attached to plans
///
/// A negative `value` means unlimited. Fluent mutators are meant for catalog
/// bootstrap only.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    id: String,
    name: String,
    description: Option<String>,
    value: i64,
    resettable: bool,
    data: Map<String, Value>,
    kind: FeatureKind,
}

impl Feature {
    pub fn new(name: impl Into<String>, id: impl Into<String>, value: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            value,
            resettable: true,
            data: Map::new(),
            kind: FeatureKind::Plain,
        }
    }

    pub fn metered(name: impl Into<String>, id: impl Into<String>, value: i64) -> Self {
        Self {
            kind: FeatureKind::Metered(MeteringInfo::default()),
            ..Self::new(name, id, value)
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }

    pub fn unlimited(mut self) -> Self {
        self.value = -1;
        self
    }

    pub fn not_resettable(mut self) -> Self {
        self.resettable = false;
        self
    }

    pub fn data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Links the feature to an external metered price. Turns a plain feature
    /// into a metered one.
    pub fn metered_price(
        mut self,
        metered_id: impl Into<String>,
        unit_price: f64,
        unit_name: impl Into<String>,
    ) -> Self {
        self.kind = FeatureKind::Metered(MeteringInfo {
            metered_id: Some(metered_id.into()),
            unit_price,
            unit_name: Some(unit_name.into()),
        });
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn get_value(&self) -> i64 {
        self.value
    }

    pub fn get_data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn kind(&self) -> &FeatureKind {
        &self.kind
    }

    pub fn is_resettable(&self) -> bool {
        self.resettable
    }

    pub fn is_unlimited(&self) -> bool {
        self.value < 0
    }

    pub fn is_metered(&self) -> bool {
        matches!(self.kind, FeatureKind::Metered(_))
    }

    pub fn metering(&self) -> Option<&MeteringInfo> {
        match &self.kind {
            FeatureKind::Metered(info) => Some(info),
            FeatureKind::Plain => None,
        }
    }

    pub fn metered_id(&self) -> Option<&str> {
        self.metering().and_then(|info| info.metered_id.as_deref())
    }

    pub fn to_view(&self) -> FeatureView {
        let metering = self.metering();
        FeatureView {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            value: self.value,
            unlimited: self.is_unlimited(),
            resettable: self.resettable,
            metered_id: metering.and_then(|info| info.metered_id.clone()),
            metered_price: metering.map(|info| info.unit_price),
            metered_unit_name: metering.and_then(|info| info.unit_name.clone()),
        }
    }
}

/// Either a raw feature id or a feature handle; resolved to the id before
/// any lookup.
#[derive(Debug, Clone, Copy)]
pub enum FeatureRef<'a> {
    Id(&'a str),
    Feature(&'a Feature),
}

impl<'a> FeatureRef<'a> {
    pub fn id(&self) -> &'a str {
        match *self {
            FeatureRef::Id(id) => id,
            FeatureRef::Feature(feature) => feature.id(),
        }
    }
}

impl<'a> From<&'a str> for FeatureRef<'a> {
    fn from(id: &'a str) -> Self {
        FeatureRef::Id(id)
    }
}

impl<'a> From<&'a String> for FeatureRef<'a> {
    fn from(id: &'a String) -> Self {
        FeatureRef::Id(id.as_str())
    }
}

impl<'a> From<&'a Feature> for FeatureRef<'a> {
    fn from(feature: &'a Feature) -> Self {
        FeatureRef::Feature(feature)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeatureView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub value: i64,
    pub unlimited: bool,
    pub resettable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metered_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metered_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metered_unit_name: Option<String>,
}
