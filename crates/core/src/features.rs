//! Per-unit feature samples and the schema a model is trained on

use crate::error::{Error, Result, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Feature values for one spatial unit (pixel or plot).
///
/// Each value is either present or missing (`None`). Non-finite inputs are
/// stored as missing, so a NaN never reaches a model as a number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSample {
    values: BTreeMap<String, Option<f64>>,
}

impl FeatureSample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Option<f64>>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Option<f64>>) {
        let value = value.into().filter(|v| v.is_finite());
        self.values.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Option<f64>> {
        self.values.remove(name)
    }

    /// `None` if the feature is absent, `Some(None)` if present but missing
    pub fn get(&self, name: &str) -> Option<Option<f64>> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Feature names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether every feature has a value
    pub fn is_complete(&self) -> bool {
        self.values.values().all(Option::is_some)
    }
}

impl<S: Into<String>> FromIterator<(S, Option<f64>)> for FeatureSample {
    fn from_iter<I: IntoIterator<Item = (S, Option<f64>)>>(iter: I) -> Self {
        let mut sample = FeatureSample::new();
        for (name, value) in iter {
            sample.insert(name, value);
        }
        sample
    }
}

/// The set of feature names a model expects, fixed at training time.
///
/// Names are kept sorted, so two schemas compare equal regardless of the
/// order features were supplied in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    /// Build a schema from feature names. Fails on an empty set.
    pub fn new<I, S>(names: I, stage: Stage) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        if names.is_empty() {
            return Err(Error::schema(stage, "feature schema is empty"));
        }
        Ok(Self { names })
    }

    /// Schema of a sample's feature names
    pub fn of(sample: &FeatureSample, stage: Stage) -> Result<Self> {
        Self::new(sample.names(), stage)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }

    /// Whether the sample exposes exactly this set of names
    pub fn matches(&self, sample: &FeatureSample) -> bool {
        sample.len() == self.names.len() && sample.names().eq(self.names.iter().map(String::as_str))
    }

    /// Values of `sample` in schema order.
    ///
    /// Returns `Ok(None)` if any value is missing and a schema mismatch
    /// error if the sample's names differ from the schema.
    pub fn project(&self, sample: &FeatureSample, stage: Stage) -> Result<Option<Vec<f64>>> {
        if !self.matches(sample) {
            let found: Vec<&str> = sample.names().collect();
            return Err(Error::schema(
                stage,
                format!("expected [{}], found [{}]", self, found.join(", ")),
            ));
        }
        Ok(self
            .names
            .iter()
            .map(|name| sample.get(name).flatten())
            .collect())
    }
}

impl fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names.join(", "))
    }
}
