use acs_core::traits::AttributeConnectorService;
use acs_core::types::AttributeConnector;
use config::ConnectorsConfig;

/// Connector settings fixed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticConnectorService {
    resource: Option<AttributeConnector>,
    subject: Option<AttributeConnector>
}

impl StaticConnectorService {
    /// No connectors: staleness is decided by markers alone.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(resource: Option<AttributeConnector>, subject: Option<AttributeConnector>) -> Self {
        Self { resource, subject }
    }

    pub fn from_config(config: &ConnectorsConfig) -> Self {
        let connector = |minutes: Option<i64>| {
            minutes.map(|max_cached_interval_minutes| AttributeConnector {
                max_cached_interval_minutes
            })
        };
        Self {
            resource: connector(config.resource_max_cached_interval_minutes),
            subject: connector(config.subject_max_cached_interval_minutes)
        }
    }
}

impl AttributeConnectorService for StaticConnectorService {
    fn resource_attribute_connector(&self) -> Option<AttributeConnector> {
        self.resource
    }

    fn subject_attribute_connector(&self) -> Option<AttributeConnector> {
        self.subject
    }
}
