//! Locally-owned game-server instances.

mod server;

pub use server::{Coalition, GameServer, ServerError, ServerStatus};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default bot-control port of the first instance.
pub const DEFAULT_BOT_PORT: u16 = 6666;
/// Default game port of the first instance.
pub const DEFAULT_GAME_PORT: u16 = 10308;
/// Default web-GUI port of the first instance.
pub const DEFAULT_WEBGUI_PORT: u16 = 8088;

const BOT_PORT_STEP: u16 = 1;
const GAME_PORT_STEP: u16 = 10;
const WEBGUI_PORT_STEP: u16 = 2;

/// Ports allocated to one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortTriple {
    pub bot_port: u16,
    pub game_port: u16,
    pub webgui_port: u16,
}

impl PortTriple {
    /// Next free triple: one step past the highest port seen in each
    /// column, with floors so the first instance lands on the defaults.
    pub fn next_free<'a>(existing: impl IntoIterator<Item = &'a PortTriple>) -> PortTriple {
        let mut max_bot = DEFAULT_BOT_PORT - BOT_PORT_STEP;
        let mut max_game = DEFAULT_GAME_PORT - GAME_PORT_STEP;
        let mut max_webgui = DEFAULT_WEBGUI_PORT - WEBGUI_PORT_STEP;

        for ports in existing {
            max_bot = max_bot.max(ports.bot_port);
            max_game = max_game.max(ports.game_port);
            max_webgui = max_webgui.max(ports.webgui_port);
        }

        PortTriple {
            bot_port: max_bot.saturating_add(BOT_PORT_STEP),
            game_port: max_game.saturating_add(GAME_PORT_STEP),
            webgui_port: max_webgui.saturating_add(WEBGUI_PORT_STEP),
        }
    }
}

/// Persisted description of a local instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    /// Home directory holding the instance's configuration and state.
    pub home: PathBuf,

    #[serde(flatten)]
    pub ports: PortTriple,

    /// Name of the server currently linked to this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(bot: u16, game: u16, webgui: u16) -> PortTriple {
        PortTriple {
            bot_port: bot,
            game_port: game,
            webgui_port: webgui,
        }
    }

    #[test]
    fn test_first_instance_gets_defaults() {
        let ports = PortTriple::next_free(std::iter::empty());
        assert_eq!(
            ports,
            triple(DEFAULT_BOT_PORT, DEFAULT_GAME_PORT, DEFAULT_WEBGUI_PORT)
        );
    }

    #[test]
    fn test_next_free_increments_past_maximum() {
        let existing = vec![triple(6666, 10308, 8088), triple(6670, 10318, 8090)];
        let ports = PortTriple::next_free(&existing);
        assert_eq!(ports, triple(6671, 10328, 8092));
    }

    #[test]
    fn test_columns_are_independent() {
        let existing = vec![triple(7000, 10308, 8088), triple(6666, 11000, 8100)];
        let ports = PortTriple::next_free(&existing);
        assert_eq!(ports, triple(7001, 11010, 8102));
    }

    #[test]
    fn test_descriptor_toml_layout() {
        let descriptor = InstanceDescriptor {
            home: PathBuf::from("/srv/instances/alpha"),
            ports: triple(6666, 10308, 8088),
            server: None,
        };
        let text = toml::to_string(&descriptor).unwrap();
        assert!(text.contains("bot_port = 6666"));
        assert!(!text.contains("server"));

        let parsed: InstanceDescriptor = toml::from_str(&text).unwrap();
        assert_eq!(parsed, descriptor);
    }
}
