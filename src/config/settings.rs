use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub dispatch: DispatchSettings,
    pub logging: LoggingSettings,
}

/// Defines the host and port the websocket server will bind to.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Upper bound on concurrently open sockets.
    pub max_connections: usize,
}

/// Where the backlog of held-back messages lives.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BacklogKind {
    #[default]
    Memory,
    Sled,
}

/// Dispatch engine settings.
///
/// `config_key` names the rule set; its admin topic is
/// `admin-config/<config_key>`. `admin_identity` is the sender of
/// notifications and is reserved as a session name.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub config_key: String,
    pub admin_identity: String,
    pub rules_file: Option<String>,
    pub backlog: BacklogKind,
    pub backlog_path: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub dispatch: Option<PartialDispatchSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialDispatchSettings {
    pub config_key: Option<String>,
    pub admin_identity: Option<String>,
    pub rules_file: Option<String>,
    pub backlog: Option<BacklogKind>,
    pub backlog_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            broker: BrokerSettings {
                max_connections: 1000,
            },
            dispatch: DispatchSettings {
                config_key: "dispatch".to_string(),
                admin_identity: "__dispatch".to_string(),
                rules_file: None,
                backlog: BacklogKind::Memory,
                backlog_path: "backlog_db".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fills every value missing here from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let dispatch = self.dispatch.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .max_connections
                    .unwrap_or(default.broker.max_connections),
            },
            dispatch: DispatchSettings {
                config_key: dispatch.config_key.unwrap_or(default.dispatch.config_key),
                admin_identity: dispatch
                    .admin_identity
                    .unwrap_or(default.dispatch.admin_identity),
                rules_file: dispatch.rules_file.or(default.dispatch.rules_file),
                backlog: dispatch.backlog.unwrap_or(default.dispatch.backlog),
                backlog_path: dispatch.backlog_path.unwrap_or(default.dispatch.backlog_path),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }
}
