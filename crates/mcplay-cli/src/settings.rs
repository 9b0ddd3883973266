//! Application settings management
//!
//! Persistent settings for the player backend, process supervision and
//! startup playback modes. Command-line flags take precedence.

use std::fs;
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ anyhow, Result };
use serde::{ Deserialize, Serialize };

use mcplay_core::driver::{ self, Template };
use mcplay_core::{ PlayerDriver, Repeat };


/// Which external player drives playback.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default )]
#[serde( rename_all = "lowercase" )]
pub enum PlayerChoice {
    /// First of mplayer, mpg123 found on PATH.
    #[default]
    Auto,
    Mplayer,
    Mpg123,
    /// Any program; `{file}` and `{offset}` are substituted.
    Command {
        template: String,
        #[serde( default )]
        extensions: Vec<String>,
    },
}


impl PlayerChoice {
    /// Parses a `--player` value.
    pub fn from_arg( arg: &str ) -> Result<Self> {
        match arg.trim() {
            "auto" => Ok( PlayerChoice::Auto ),
            "mplayer" => Ok( PlayerChoice::Mplayer ),
            "mpg123" => Ok( PlayerChoice::Mpg123 ),
            template if template.contains( "{file}" ) => Ok( PlayerChoice::Command {
                template: template.to_string(),
                extensions: Vec::new(),
            }),
            other => Err( anyhow!( "Unknown player {:?} (expected auto, mplayer, mpg123 or a template with {{file}})", other ) ),
        }
    }


    /// Builds the driver for this choice.
    pub fn driver( &self ) -> Result<Arc<dyn PlayerDriver>> {
        let driver: Box<dyn PlayerDriver> = match self {
            PlayerChoice::Auto => driver::detect()
                .ok_or_else( || anyhow!( "No supported player found on PATH (tried mplayer, mpg123)" ) )?,
            PlayerChoice::Mplayer => driver::by_name( "mplayer" )
                .ok_or_else( || anyhow!( "mplayer not found on PATH" ) )?,
            PlayerChoice::Mpg123 => driver::by_name( "mpg123" )
                .ok_or_else( || anyhow!( "mpg123 not found on PATH" ) )?,
            PlayerChoice::Command { template, extensions } => Box::new(
                Template::new( template, extensions.clone() )
                    .ok_or_else( || anyhow!( "Player command template is empty" ) )?,
            ),
        };
        Ok( Arc::from( driver ) )
    }
}


/// Repeat mode as written in the settings file.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default )]
#[serde( rename_all = "lowercase" )]
pub enum RepeatSetting {
    #[default]
    Off,
    One,
    All,
}


impl From<RepeatSetting> for Repeat {
    fn from( setting: RepeatSetting ) -> Self {
        match setting {
            RepeatSetting::Off => Repeat::Off,
            RepeatSetting::One => Repeat::One,
            RepeatSetting::All => Repeat::All,
        }
    }
}


/// Application settings.
#[derive( Debug, Clone, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// External player backend
    pub player: PlayerChoice,

    /// How long a player gets to quit before it is killed
    pub grace_period_ms: u64,

    /// Directory for the remote control socket; `$TMPDIR` or /tmp if unset
    pub control_dir: Option<PathBuf>,

    pub repeat: RepeatSetting,

    pub shuffle: bool,

    /// Volume applied to every player once it starts; player default if unset
    pub volume: Option<u8>,

    /// Read titles and durations from file tags
    pub read_tags: bool,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            player: PlayerChoice::Auto,
            grace_period_ms: mcplay_core::supervisor::DEFAULT_GRACE.as_millis() as u64,
            control_dir: None,
            repeat: RepeatSetting::Off,
            shuffle: false,
            volume: None,
            read_tags: true,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "mcplay" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if not found.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some( path ) => Self::load_from( &path ),
            None => Self::default(),
        }
    }


    /// Loads settings from `path`; missing or unreadable files give defaults.
    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => serde_json::from_str( &contents ).unwrap_or_else( |e| {
                tracing::warn!( "Ignoring malformed settings {:?}: {}", path, e );
                Self::default()
            }),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to `path`, creating its directory.
    pub fn save_to( &self, path: &Path ) {
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    /// Writes the defaults on first run so there is a file to edit.
    pub fn ensure_saved() {
        if let Some( path ) = Self::settings_path() {
            if !path.exists() {
                tracing::info!( "Writing default settings to {:?}", path );
                Self::default().save_to( &path );
            }
        }
    }


    pub fn grace_period( &self ) -> Duration {
        Duration::from_millis( self.grace_period_ms )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_missing_and_malformed_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        assert_eq!( Settings::load_from( &path ).player, PlayerChoice::Auto );

        fs::write( &path, "{ not json" ).unwrap();
        let settings = Settings::load_from( &path );
        assert_eq!( settings.grace_period(), Duration::from_millis( 1500 ) );
        assert!( settings.read_tags );
    }


    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "repeat": "all", "player": { "command": { "template": "ogg123 {file}", "extensions": [ "ogg" ] } } }"# ).unwrap();

        let settings = Settings::load_from( &path );
        assert_eq!( Repeat::from( settings.repeat ), Repeat::All );
        assert_eq!( settings.player, PlayerChoice::Command {
            template: "ogg123 {file}".into(),
            extensions: vec![ "ogg".into() ],
        });
        assert!( !settings.shuffle );
    }


    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );
        let settings = Settings { volume: Some( 40 ), shuffle: true, ..Settings::default() };
        settings.save_to( &path );

        let loaded = Settings::load_from( &path );
        assert_eq!( loaded.volume, Some( 40 ) );
        assert!( loaded.shuffle );
    }


    #[test]
    fn test_player_from_arg() {
        assert_eq!( PlayerChoice::from_arg( "mpg123" ).unwrap(), PlayerChoice::Mpg123 );
        assert!( matches!( PlayerChoice::from_arg( "ogg123 -q {file}" ).unwrap(), PlayerChoice::Command { .. } ) );
        assert!( PlayerChoice::from_arg( "winamp" ).is_err() );
    }


    #[test]
    fn test_template_driver_builds() {
        let choice = PlayerChoice::Command { template: "sox {file} -d".into(), extensions: vec![] };
        let driver = choice.driver().unwrap();
        assert_eq!( driver.name(), "sox" );
    }
}
