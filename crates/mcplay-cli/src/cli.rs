//! Command-line argument parsing for mcplay.

use std::path::PathBuf;

use clap::Parser;


/// mcplay - a terminal playlist manager driving an external player.
#[derive( Parser, Debug )]
#[command( name = "mcplay" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Restricted mode: never browse above the starting directory.
    #[arg( short = 'n' )]
    pub restricted: bool,

    /// Start with repeat (all) enabled.
    #[arg( short = 'r' )]
    pub repeat: bool,

    /// Start with shuffle enabled.
    #[arg( short = 'R' )]
    pub shuffle: bool,

    /// Player to use: mplayer, mpg123 or a command template with {file}.
    #[arg( long )]
    pub player: Option<String>,

    /// Directory holding the remote control socket.
    #[arg( long )]
    pub control_dir: Option<PathBuf>,

    /// Send one command to a running instance and exit.
    #[arg( long, value_name = "COMMAND" )]
    pub send: Option<String>,

    /// Files, directories, playlists or URLs to put on the playlist.
    #[arg( trailing_var_arg = true )]
    pub paths: Vec<String>,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_flags_and_paths() {
        let args = Args::parse_from([ "mcplay", "-n", "-R", "--player", "mpg123", "a.mp3", "http://x/" ]);
        assert!( args.restricted );
        assert!( args.shuffle );
        assert!( !args.repeat );
        assert_eq!( args.player.as_deref(), Some( "mpg123" ) );
        assert_eq!( args.paths, vec![ "a.mp3", "http://x/" ] );
    }


    #[test]
    fn test_send() {
        let args = Args::parse_from([ "mcplay", "--send", "next" ]);
        assert_eq!( args.send.as_deref(), Some( "next" ) );
        assert!( args.paths.is_empty() );
    }
}
