//! Remote control socket.
//!
//! A running instance listens on a per-user Unix socket. Every line
//! written to it is parsed as a [`Command`] and queued on the remote
//! inbox; lines that fail to parse are logged and dropped.

use std::io::{ self, BufRead, BufReader, Write };
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{ UnixListener, UnixStream };
use std::path::{ Path, PathBuf };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread::{ self, JoinHandle };

use thiserror::Error;

use crate::command::Command;
use crate::dispatch::Inbox;


/// Errors from the remote control socket.
#[derive( Debug, Error )]
pub enum RemoteError {
    #[error( "Another instance is already listening on {0}" )]
    AlreadyRunning( PathBuf ),

    #[error( "No instance is listening on {0}" )]
    NotRunning( PathBuf ),

    #[error( "IO error: {0}" )]
    Io( #[from] io::Error ),
}


/// Socket file name for `user` inside `dir`.
pub fn socket_path( dir: &Path, app: &str, user: &str ) -> PathBuf {
    dir.join( format!( "{}-control-{}", app, user ) )
}


/// Name of the current user.
pub fn current_user() -> String {
    for var in [ "USER", "LOGNAME" ] {
        if let Ok( name ) = std::env::var( var ) {
            if !name.is_empty() {
                return name;
            }
        }
    }
    match nix::unistd::User::from_uid( nix::unistd::getuid() ) {
        Ok( Some( user ) ) => user.name,
        _ => nix::unistd::getuid().to_string(),
    }
}


/// Directory that holds control sockets when none is configured.
pub fn default_control_dir() -> PathBuf {
    std::env::var_os( "TMPDIR" )
        .filter( |dir| !dir.is_empty() )
        .map( PathBuf::from )
        .unwrap_or_else( || PathBuf::from( "/tmp" ) )
}


/// Writes one command line to a running instance.
pub fn send_line( path: &Path, line: &str ) -> Result<(), RemoteError> {
    let mut stream = UnixStream::connect( path ).map_err( |e| match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => RemoteError::NotRunning( path.to_path_buf() ),
        _ => RemoteError::Io( e ),
    })?;
    writeln!( stream, "{}", line.trim_end() )?;
    stream.flush()?;
    Ok(())
}


/// Accepts connections on the control socket until dropped.
pub struct RemoteListener {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}


impl RemoteListener {
    /// Binds the socket at `path` and starts accepting.
    ///
    /// A leftover socket file nobody answers on is replaced.
    pub fn bind( path: &Path, inbox: Inbox ) -> Result<Self, RemoteError> {
        if path.exists() {
            if UnixStream::connect( path ).is_ok() {
                return Err( RemoteError::AlreadyRunning( path.to_path_buf() ) );
            }
            tracing::info!( "Removing stale control socket {:?}", path );
            std::fs::remove_file( path )?;
        }

        let listener = UnixListener::bind( path )?;
        std::fs::set_permissions( path, std::fs::Permissions::from_mode( 0o600 ) )?;
        tracing::info!( "Listening for remote commands on {:?}", path );

        let stop = Arc::new( AtomicBool::new( false ) );
        let thread = {
            let stop = Arc::clone( &stop );
            thread::Builder::new()
                .name( "remote-accept".into() )
                .spawn( move || accept( listener, inbox, stop ) )?
        };

        Ok( Self { path: path.to_path_buf(), stop, thread: Some( thread ) } )
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }
}


impl Drop for RemoteListener {
    fn drop( &mut self ) {
        self.stop.store( true, Ordering::SeqCst );
        // Wake the accept loop so it sees the flag.
        let _ = UnixStream::connect( &self.path );
        if let Some( thread ) = self.thread.take() {
            let _ = thread.join();
        }
        if let Err( e ) = std::fs::remove_file( &self.path ) {
            tracing::debug!( "Failed to remove {:?}: {}", self.path, e );
        }
    }
}


fn accept( listener: UnixListener, inbox: Inbox, stop: Arc<AtomicBool> ) {
    for stream in listener.incoming() {
        if stop.load( Ordering::SeqCst ) {
            break;
        }
        match stream {
            Ok( stream ) => {
                let inbox = inbox.clone();
                let spawned = thread::Builder::new()
                    .name( "remote-client".into() )
                    .spawn( move || serve( stream, inbox ) );
                if let Err( e ) = spawned {
                    tracing::error!( "Failed to spawn remote client thread: {}", e );
                }
            }
            Err( e ) => tracing::warn!( "Remote accept failed: {}", e ),
        }
    }
    tracing::debug!( "Remote listener stopped" );
}


fn serve( stream: UnixStream, inbox: Inbox ) {
    let mut reader = BufReader::new( stream );
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until( b'\n', &mut buf ) {
            Ok( 0 ) => return,
            Ok( _ ) => {}
            Err( e ) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err( e ) => {
                tracing::debug!( "Remote client read failed: {}", e );
                return;
            }
        }

        let Ok( line ) = std::str::from_utf8( &buf ) else {
            tracing::debug!( "Ignoring non UTF-8 remote line ({} bytes)", buf.len() );
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Command::parse( line ) {
            Ok( command ) => {
                tracing::debug!( "Remote command: {:?}", command );
                if !inbox.command( command ) {
                    return;
                }
            }
            Err( e ) => tracing::debug!( "Ignoring remote line {:?}: {}", line, e ),
        }
    }
}


#[cfg( test )]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::command::{ SeekTarget, VolumeChange };
    use crate::dispatch::{ Dispatcher, Event, Source };


    fn next_command( queue: &crate::dispatch::Queue ) -> Command {
        match queue.recv_timeout( Duration::from_secs( 5 ) ).unwrap().event {
            Event::Command( command ) => command,
            other => panic!( "unexpected event {:?}", other ),
        }
    }


    #[test]
    fn test_socket_path() {
        let path = socket_path( Path::new( "/tmp" ), "mcplay", "alice" );
        assert_eq!( path, PathBuf::from( "/tmp/mcplay-control-alice" ) );
    }


    #[test]
    fn test_lines_become_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "ctl.sock" );
        let dispatcher = Dispatcher::new();
        let listener = RemoteListener::bind( &path, dispatcher.inbox( Source::Remote ) ).unwrap();
        let queue = dispatcher.into_receiver();

        let mode = std::fs::metadata( &path ).unwrap().permissions().mode();
        assert_eq!( mode & 0o777, 0o600 );

        let mut stream = UnixStream::connect( listener.path() ).unwrap();
        writeln!( stream, "next" ).unwrap();
        writeln!( stream, "bogus command" ).unwrap();
        writeln!( stream, "seek -10" ).unwrap();
        writeln!( stream, "volume +5" ).unwrap();
        drop( stream );

        assert_eq!( next_command( &queue ), Command::Next );
        assert_eq!( next_command( &queue ), Command::Seek( SeekTarget::Relative( -10 ) ) );
        assert_eq!( next_command( &queue ), Command::Volume( VolumeChange::Step( 5 ) ) );
    }


    #[test]
    fn test_garbage_bytes_keep_connection_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "ctl.sock" );
        let dispatcher = Dispatcher::new();
        let listener = RemoteListener::bind( &path, dispatcher.inbox( Source::Remote ) ).unwrap();
        let queue = dispatcher.into_receiver();

        let mut stream = UnixStream::connect( listener.path() ).unwrap();
        stream.write_all( b"\xff\xfe garbage\nnext\n\x00\x01\r\n  \nstop" ).unwrap();
        drop( stream );

        assert_eq!( next_command( &queue ), Command::Next );
        assert_eq!( next_command( &queue ), Command::Stop );
    }


    #[test]
    fn test_send_line_reaches_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "ctl.sock" );
        let dispatcher = Dispatcher::new();
        let _listener = RemoteListener::bind( &path, dispatcher.inbox( Source::Remote ) ).unwrap();
        let queue = dispatcher.into_receiver();

        send_line( &path, "pause\n" ).unwrap();
        let envelope = queue.recv_timeout( Duration::from_secs( 5 ) ).unwrap();
        assert_eq!( envelope.source, Source::Remote );
        assert_eq!( envelope.event, Event::Command( Command::TogglePause ) );
    }


    #[test]
    fn test_second_instance_refused_and_stale_socket_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "ctl.sock" );
        let dispatcher = Dispatcher::new();

        let first = RemoteListener::bind( &path, dispatcher.inbox( Source::Remote ) ).unwrap();
        assert!( matches!(
            RemoteListener::bind( &path, dispatcher.inbox( Source::Remote ) ),
            Err( RemoteError::AlreadyRunning( _ ) )
        ));
        drop( first );
        assert!( !path.exists() );

        // A socket file left behind by a dead process.
        drop( UnixListener::bind( &path ).unwrap() );
        assert!( path.exists() );
        let _second = RemoteListener::bind( &path, dispatcher.inbox( Source::Remote ) ).unwrap();
    }


    #[test]
    fn test_send_without_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "none.sock" );
        assert!( matches!( send_line( &path, "next" ), Err( RemoteError::NotRunning( _ ) ) ) );
    }
}
