//! Player drivers.
//!
//! A driver describes how to launch one external player and how abstract
//! [`Control`] commands map onto its wire format: lines written to the
//! player's stdin, or signals delivered to its process group. Drivers are
//! chosen once at startup.

use std::os::unix::fs::PermissionsExt;
use std::path::{ Path, PathBuf };
use std::process::{ Command, Stdio };
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::command::SeekTarget;


/// Abstract control command for a running player.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Control {
    Pause,
    Resume,
    Seek( SeekTarget ),
    SetVolume( u8 ),
    Terminate,
}


/// Wire form of a control command.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum Wire {
    /// A line for the player's stdin, without the newline.
    Line( String ),
    /// A signal for the player's process group.
    Signal( Signal ),
    /// The player has no way to do this.
    Unsupported,
}


/// Something the player reported on stdout.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Report {
    Progress { position: Duration, length: Option<Duration> },
    /// The track finished; the player is idle but still running.
    Finished,
}


/// Launch recipe and wire mapping for one external player.
pub trait PlayerDriver: Send + Sync {
    /// Short name used in logs and settings.
    fn name( &self ) -> &str;

    /// Builds the process for `locator`, starting at `offset`.
    fn command( &self, locator: &str, offset: Duration ) -> Command;

    /// Lines written to stdin right after spawning.
    fn preamble( &self, _locator: &str, _offset: Duration ) -> Vec<String> {
        Vec::new()
    }

    /// True if the player reads commands from stdin.
    fn uses_stdin( &self ) -> bool;

    /// Maps a control command onto the wire.
    fn encode( &self, control: Control ) -> Wire;

    /// Parses one line of player output.
    fn parse_line( &self, _line: &str ) -> Option<Report> {
        None
    }

    /// True if the player cannot seek in-band but can start at an offset,
    /// so seeking means restarting.
    fn restart_seeks( &self ) -> bool {
        false
    }

    /// True if the player handles this locator.
    fn accepts( &self, _locator: &str ) -> bool {
        true
    }
}


/// MPlayer in slave mode.
#[derive( Debug, Clone )]
pub struct Mplayer {
    program: PathBuf,
}


impl Mplayer {
    pub fn new( program: impl Into<PathBuf> ) -> Self {
        Self { program: program.into() }
    }
}


impl PlayerDriver for Mplayer {
    fn name( &self ) -> &str {
        "mplayer"
    }


    fn command( &self, locator: &str, offset: Duration ) -> Command {
        let mut cmd = Command::new( &self.program );
        cmd.args( [ "-slave", "-nolirc", "-vo", "null" ] );
        if !offset.is_zero() {
            cmd.arg( "-ss" ).arg( offset.as_secs().to_string() );
        }
        cmd.arg( locator );
        cmd
    }


    fn uses_stdin( &self ) -> bool {
        true
    }


    fn encode( &self, control: Control ) -> Wire {
        // `pause` toggles; any other command would unpause without the prefix.
        Wire::Line( match control {
            Control::Pause | Control::Resume => "pause".to_string(),
            Control::Seek( SeekTarget::Relative( secs ) ) => format!( "pausing_keep seek {} 0", secs ),
            Control::Seek( SeekTarget::Absolute( pos ) ) => format!( "pausing_keep seek {} 2", pos.as_secs() ),
            Control::SetVolume( level ) => format!( "pausing_keep volume {} 1", level ),
            Control::Terminate => "quit".to_string(),
        })
    }


    /// Status lines look like `A:  12.3 (12.3) of 200.0 (03:20.0)  0.4%`.
    fn parse_line( &self, line: &str ) -> Option<Report> {
        let rest = line.trim_start().strip_prefix( "A:" )?;
        let position = rest.split_whitespace().next()?.parse::<f64>().ok()?;
        let length = rest
            .split_once( " of " )
            .and_then( |( _, tail )| tail.split_whitespace().next() )
            .and_then( |v| v.parse::<f64>().ok() )
            .filter( |v| *v > 0.0 )
            .map( Duration::from_secs_f64 );
        Some( Report::Progress {
            position: Duration::from_secs_f64( position.max( 0.0 ) ),
            length,
        })
    }
}


/// mpg123 in remote-control mode (`-R`).
#[derive( Debug, Clone )]
pub struct Mpg123 {
    program: PathBuf,
}


impl Mpg123 {
    pub fn new( program: impl Into<PathBuf> ) -> Self {
        Self { program: program.into() }
    }
}


impl PlayerDriver for Mpg123 {
    fn name( &self ) -> &str {
        "mpg123"
    }


    fn command( &self, _locator: &str, _offset: Duration ) -> Command {
        let mut cmd = Command::new( &self.program );
        cmd.arg( "-R" );
        cmd
    }


    fn preamble( &self, locator: &str, offset: Duration ) -> Vec<String> {
        let mut lines = vec![ format!( "LOAD {}", locator ) ];
        if !offset.is_zero() {
            lines.push( format!( "JUMP {}s", offset.as_secs() ) );
        }
        lines
    }


    fn uses_stdin( &self ) -> bool {
        true
    }


    fn encode( &self, control: Control ) -> Wire {
        Wire::Line( match control {
            Control::Pause | Control::Resume => "PAUSE".to_string(),
            Control::Seek( SeekTarget::Relative( secs ) ) => format!( "JUMP {:+}s", secs ),
            Control::Seek( SeekTarget::Absolute( pos ) ) => format!( "JUMP {}s", pos.as_secs() ),
            Control::SetVolume( level ) => format!( "VOLUME {}", level ),
            Control::Terminate => "QUIT".to_string(),
        })
    }


    /// `@F <frame> <frames left> <seconds> <seconds left>` reports progress,
    /// `@P 0` the end of the track.
    fn parse_line( &self, line: &str ) -> Option<Report> {
        let line = line.trim();
        if line == "@P 0" {
            return Some( Report::Finished );
        }

        let fields: Vec<&str> = line.strip_prefix( "@F " )?.split_whitespace().collect();
        if fields.len() < 4 {
            return None;
        }
        let position = fields[ 2 ].parse::<f64>().ok()?.max( 0.0 );
        let left = fields[ 3 ].parse::<f64>().ok()?.max( 0.0 );
        Some( Report::Progress {
            position: Duration::from_secs_f64( position ),
            length: Some( Duration::from_secs_f64( position + left ) ),
        })
    }
}


/// Arbitrary command line with `{file}` and `{offset}` placeholders.
///
/// Pausing stops the process group, quitting interrupts it.
#[derive( Debug, Clone )]
pub struct Template {
    args: Vec<String>,
    extensions: Vec<String>,
}


impl Template {
    /// Splits `template` on whitespace. Placeholders are substituted inside
    /// each word, so a locator with spaces stays one argument.
    ///
    /// @param extensions - Lowercase extensions this player handles; empty means all
    ///
    /// @returns None for an empty template
    pub fn new( template: &str, extensions: Vec<String> ) -> Option<Self> {
        let args: Vec<String> = template.split_whitespace().map( String::from ).collect();
        if args.is_empty() {
            return None;
        }
        let extensions = extensions
            .into_iter()
            .map( |e| e.trim_start_matches( '.' ).to_lowercase() )
            .collect();
        Some( Self { args, extensions } )
    }


    fn expand( &self, locator: &str, offset: Duration ) -> Vec<String> {
        let offset = offset.as_secs().to_string();
        self.args
            .iter()
            .map( |a| a.replace( "{file}", locator ).replace( "{offset}", &offset ) )
            .collect()
    }
}


impl PlayerDriver for Template {
    fn name( &self ) -> &str {
        &self.args[ 0 ]
    }


    fn command( &self, locator: &str, offset: Duration ) -> Command {
        let argv = self.expand( locator, offset );
        let mut cmd = Command::new( &argv[ 0 ] );
        cmd.args( &argv[ 1.. ] );
        cmd
    }


    fn uses_stdin( &self ) -> bool {
        false
    }


    fn encode( &self, control: Control ) -> Wire {
        match control {
            Control::Pause => Wire::Signal( Signal::SIGSTOP ),
            Control::Resume => Wire::Signal( Signal::SIGCONT ),
            Control::Terminate => Wire::Signal( Signal::SIGINT ),
            Control::Seek( _ ) | Control::SetVolume( _ ) => Wire::Unsupported,
        }
    }


    fn restart_seeks( &self ) -> bool {
        self.args.iter().any( |a| a.contains( "{offset}" ) )
    }


    fn accepts( &self, locator: &str ) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        Path::new( locator )
            .extension()
            .and_then( |e| e.to_str() )
            .map( |e| self.extensions.contains( &e.to_lowercase() ) )
            .unwrap_or( false )
    }
}


/// Configures stdio for a driver's process.
pub fn stdio( cmd: &mut Command, driver: &dyn PlayerDriver ) {
    if driver.uses_stdin() {
        cmd.stdin( Stdio::piped() ).stdout( Stdio::piped() );
    } else {
        cmd.stdin( Stdio::null() ).stdout( Stdio::null() );
    }
    cmd.stderr( Stdio::null() );
}


/// Builds a driver by player name, locating the executable on `PATH`.
pub fn by_name( name: &str ) -> Option<Box<dyn PlayerDriver>> {
    let program = find_in_path( name )?;
    match name {
        "mplayer" => Some( Box::new( Mplayer::new( program ) ) ),
        "mpg123" => Some( Box::new( Mpg123::new( program ) ) ),
        _ => None,
    }
}


/// First known player found on `PATH`.
pub fn detect() -> Option<Box<dyn PlayerDriver>> {
    [ "mplayer", "mpg123" ].into_iter().find_map( |name| {
        let driver = by_name( name )?;
        tracing::info!( "Using player: {}", name );
        Some( driver )
    })
}


/// Looks up an executable on `PATH`.
pub fn find_in_path( name: &str ) -> Option<PathBuf> {
    let path = std::env::var_os( "PATH" )?;
    std::env::split_paths( &path )
        .map( |dir| dir.join( name ) )
        .find( |candidate| is_executable( candidate ) )
}


fn is_executable( path: &Path ) -> bool {
    std::fs::metadata( path )
        .map( |m| m.is_file() && m.permissions().mode() & 0o111 != 0 )
        .unwrap_or( false )
}


#[cfg( test )]
mod tests {
    use super::*;


    fn argv( cmd: &Command ) -> Vec<String> {
        std::iter::once( cmd.get_program() )
            .chain( cmd.get_args() )
            .map( |a| a.to_string_lossy().into_owned() )
            .collect()
    }


    #[test]
    fn test_mplayer_wire() {
        let driver = Mplayer::new( "mplayer" );
        assert_eq!( driver.encode( Control::Pause ), Wire::Line( "pause".into() ) );
        assert_eq!(
            driver.encode( Control::Seek( SeekTarget::Relative( -10 ) ) ),
            Wire::Line( "pausing_keep seek -10 0".into() )
        );
        assert_eq!(
            driver.encode( Control::Seek( SeekTarget::Absolute( Duration::from_secs( 90 ) ) ) ),
            Wire::Line( "pausing_keep seek 90 2".into() )
        );
        assert_eq!( driver.encode( Control::SetVolume( 40 ) ), Wire::Line( "pausing_keep volume 40 1".into() ) );
        assert_eq!( driver.encode( Control::Terminate ), Wire::Line( "quit".into() ) );

        let cmd = driver.command( "/m/a.ogg", Duration::from_secs( 30 ) );
        assert_eq!( argv( &cmd ), vec![ "mplayer", "-slave", "-nolirc", "-vo", "null", "-ss", "30", "/m/a.ogg" ] );
    }


    #[test]
    fn test_mplayer_progress() {
        let driver = Mplayer::new( "mplayer" );
        assert_eq!(
            driver.parse_line( "A:  12.3 (12.3) of 200.0 (03:20.0)  0.4% " ),
            Some( Report::Progress {
                position: Duration::from_secs_f64( 12.3 ),
                length: Some( Duration::from_secs( 200 ) ),
            })
        );
        assert_eq!( driver.parse_line( "Playing /m/a.ogg." ), None );
    }


    #[test]
    fn test_mpg123_wire() {
        let driver = Mpg123::new( "mpg123" );
        assert_eq!(
            driver.preamble( "/m/a.mp3", Duration::from_secs( 5 ) ),
            vec![ "LOAD /m/a.mp3".to_string(), "JUMP 5s".to_string() ]
        );
        assert_eq!(
            driver.encode( Control::Seek( SeekTarget::Relative( 10 ) ) ),
            Wire::Line( "JUMP +10s".into() )
        );
        assert_eq!(
            driver.encode( Control::Seek( SeekTarget::Relative( -10 ) ) ),
            Wire::Line( "JUMP -10s".into() )
        );
        assert_eq!( driver.encode( Control::SetVolume( 70 ) ), Wire::Line( "VOLUME 70".into() ) );
        assert_eq!( driver.encode( Control::Terminate ), Wire::Line( "QUIT".into() ) );
    }


    #[test]
    fn test_mpg123_reports() {
        let driver = Mpg123::new( "mpg123" );
        assert_eq!( driver.parse_line( "@P 0" ), Some( Report::Finished ) );
        assert_eq!(
            driver.parse_line( "@F 100 900 2.61 23.50" ),
            Some( Report::Progress {
                position: Duration::from_secs_f64( 2.61 ),
                length: Some( Duration::from_secs_f64( 2.61 + 23.50 ) ),
            })
        );
        assert_eq!( driver.parse_line( "@R MPG123" ), None );
        assert_eq!( driver.parse_line( "@P 2" ), None );
    }


    #[test]
    fn test_template_substitution() {
        let driver = Template::new( "ogg123 -q -k {offset} {file}", vec![ ".OGG".into() ] ).unwrap();
        let cmd = driver.command( "/m/My Song.ogg", Duration::from_secs( 42 ) );
        assert_eq!( argv( &cmd ), vec![ "ogg123", "-q", "-k", "42", "/m/My Song.ogg" ] );
        assert!( driver.restart_seeks() );
        assert!( driver.accepts( "/m/x.ogg" ) );
        assert!( !driver.accepts( "/m/x.mp3" ) );
        assert_eq!( driver.encode( Control::Pause ), Wire::Signal( Signal::SIGSTOP ) );
        assert_eq!( driver.encode( Control::SetVolume( 3 ) ), Wire::Unsupported );

        let plain = Template::new( "play {file}", Vec::new() ).unwrap();
        assert!( !plain.restart_seeks() );
        assert!( plain.accepts( "anything" ) );
        assert!( Template::new( "   ", Vec::new() ).is_none() );
    }


    #[test]
    fn test_find_in_path() {
        assert!( find_in_path( "sh" ).is_some() );
        assert!( find_in_path( "definitely-not-a-player-7f3a" ).is_none() );
    }
}
