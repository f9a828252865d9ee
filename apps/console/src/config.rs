use std::{collections::HashMap, fs};

#[derive(Debug)]
pub struct Settings {
    pub url: String,
    pub room_name: String,
    pub participant_identity: String,
    pub command_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url: "wss://rooms.invalid".into(),
            room_name: "community-demo".into(),
            participant_identity: "demo-user".into(),
            command_timeout_secs: 10,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("console.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("url") {
                settings.url = v.clone();
            }
            if let Some(v) = file_cfg.get("room_name") {
                settings.room_name = v.clone();
            }
            if let Some(v) = file_cfg.get("participant_identity") {
                settings.participant_identity = v.clone();
            }
            if let Some(v) = file_cfg.get("command_timeout_secs") {
                if let Ok(parsed) = v.parse() {
                    settings.command_timeout_secs = parsed;
                }
            }
        }
    }

    if let Ok(v) = std::env::var("SYNC_URL") {
        settings.url = v;
    }
    if let Ok(v) = std::env::var("SYNC_ROOM_NAME") {
        settings.room_name = v;
    }
    if let Ok(v) = std::env::var("SYNC_PARTICIPANT_IDENTITY") {
        settings.participant_identity = v;
    }
    if let Ok(v) = std::env::var("SYNC_COMMAND_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse() {
            settings.command_timeout_secs = parsed;
        }
    }

    settings
}
