//! Label sets shared by every generated object
//!
//! The base set identifies the app instance so teardown and status lookups
//! can select objects without knowing their names.

use std::collections::BTreeMap;

use crate::naming::{resource_name, NamingContext};
use crate::{
    LABEL_APP_ID_HASH, LABEL_APP_INSTANCE_HASH, LABEL_APP_SELECTOR, LABEL_COMPONENT,
    LABEL_COMPOSE_SERVICE_HEADLESS, LABEL_INSTANCE, LABEL_MANAGED_BY, LABEL_MANAGED_BY_KOMPOX,
    LABEL_NAME,
};

/// Labels of one app component
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppLabels {
    component: String,
    resource: String,
    base: BTreeMap<String, String>,
}

impl AppLabels {
    /// Label sets for `app`/`component` under a naming context
    pub fn new(app: &str, component: &str, naming: &NamingContext) -> Self {
        let base = BTreeMap::from([
            (LABEL_NAME.to_string(), app.to_string()),
            (
                LABEL_INSTANCE.to_string(),
                format!("{}-{}", app, naming.app_instance),
            ),
            (
                LABEL_MANAGED_BY.to_string(),
                LABEL_MANAGED_BY_KOMPOX.to_string(),
            ),
            (
                LABEL_APP_INSTANCE_HASH.to_string(),
                naming.app_instance.clone(),
            ),
            (LABEL_APP_ID_HASH.to_string(), naming.app_id.clone()),
        ]);
        Self {
            component: component.to_string(),
            resource: resource_name(app, component),
            base,
        }
    }

    /// Labels carried by every object of the app
    pub fn base(&self) -> &BTreeMap<String, String> {
        &self.base
    }

    /// Base labels plus the selector and component labels
    pub fn component(&self) -> BTreeMap<String, String> {
        let mut labels = self.base.clone();
        labels.extend(self.selector());
        labels.insert(LABEL_COMPONENT.to_string(), self.component.clone());
        labels
    }

    /// Pod selector of the component
    pub fn selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(LABEL_APP_SELECTOR.to_string(), self.resource.clone())])
    }

    /// Component labels plus the headless Service marker
    pub fn headless(&self) -> BTreeMap<String, String> {
        let mut labels = self.component();
        labels.insert(LABEL_COMPOSE_SERVICE_HEADLESS.to_string(), "true".to_string());
        labels
    }

    /// `<app>-<component>`
    pub fn resource_name(&self) -> &str {
        &self.resource
    }
}
