//! Player process supervisor.
//!
//! Starts, controls and reaps exactly one external player process at a
//! time. Each process runs in its own process group so pause, resume and
//! kill reach any children it forks. A watcher thread waits for the exit
//! and queues [`ProcessEvent::Exited`]; a reader thread turns the player's
//! stdout into progress events.

use std::fs::File;
use std::io::{ Read, Write };
use std::os::unix::process::{ CommandExt, ExitStatusExt };
use std::process::{ Child, ChildStdin, ChildStdout, ExitStatus };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Condvar, Mutex, PoisonError };
use std::thread;
use std::time::Duration;

use nix::sys::signal::{ killpg, Signal };
use nix::unistd::Pid;
use thiserror::Error;

use crate::dispatch::Inbox;
use crate::driver::{ self, Control, PlayerDriver, Report, Wire };
use crate::entry::is_url;
use crate::lock;


/// Default time a player gets to quit before it is killed.
pub const DEFAULT_GRACE: Duration = Duration::from_millis( 1500 );


/// Opaque reference to a started process.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub struct Handle( pub u64 );


/// Observed state of a process.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum ProcessStatus {
    Running,
    ExitedNormally,
    /// Non-zero exit code, or 128 + signal number for a crash.
    ExitedError( i32 ),
    /// Ended by us.
    Killed,
}


/// Events the supervisor queues for the controller.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum ProcessEvent {
    Ready( Handle ),
    Exited { handle: Handle, status: ProcessStatus },
    Progress { handle: Handle, position: Duration, length: Option<Duration> },
}


/// Outcome of [`Supervise::send`].
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Delivery {
    Sent,
    /// The handle is gone; nothing was delivered.
    Stale,
    /// The driver has no mapping for the command.
    Unsupported,
}


/// Errors that can occur while supervising a player.
#[derive( Debug, Error )]
pub enum SupervisorError {
    #[error( "Failed to start player for {locator}: {source}" )]
    Spawn { locator: String, source: std::io::Error },

    #[error( "Player does not handle {0}" )]
    Unsupported( String ),

    #[error( "Player {handle:?} did not quit within {grace:?}" )]
    TerminationTimeout { handle: Handle, grace: Duration },

    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),
}


/// Process lifecycle operations the controller relies on.
pub trait Supervise {
    /// Spawns a player for `locator` starting at `offset`.
    fn start( &mut self, locator: &str, offset: Duration ) -> Result<Handle, SupervisorError>;

    /// Forwards a control command.
    fn send( &mut self, handle: Handle, control: Control ) -> Delivery;

    /// Status of the tracked (or most recently terminated) process.
    fn poll( &mut self ) -> Option<( Handle, ProcessStatus )>;

    /// Stops the process, killing it after the grace period. Idempotent.
    fn terminate( &mut self, handle: Handle ) -> Result<ProcessStatus, SupervisorError>;

    /// True if seeking means restarting at an offset.
    fn restart_seeks( &self ) -> bool;
}


/// Exit status shared between the watcher thread and the supervisor.
#[derive( Debug, Default )]
struct ExitSlot {
    status: Mutex<Option<ProcessStatus>>,
    cond: Condvar,
}


impl ExitSlot {
    fn get( &self ) -> Option<ProcessStatus> {
        *lock( &self.status )
    }


    fn set( &self, status: ProcessStatus ) {
        *lock( &self.status ) = Some( status );
        self.cond.notify_all();
    }


    fn wait( &self, timeout: Duration ) -> Option<ProcessStatus> {
        let guard = lock( &self.status );
        let ( guard, _ ) = self.cond
            .wait_timeout_while( guard, timeout, |s| s.is_none() )
            .unwrap_or_else( PoisonError::into_inner );
        *guard
    }
}


type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;


#[derive( Debug )]
struct Process {
    handle: Handle,
    pid: Pid,
    stdin: SharedStdin,
    exit: Arc<ExitSlot>,
    terminating: Arc<AtomicBool>,
}


impl Process {
    fn signal( &self, signal: Signal ) -> nix::Result<()> {
        killpg( self.pid, signal )
    }
}


/// Supervisor for real child processes.
pub struct Supervisor {
    driver: Arc<dyn PlayerDriver>,
    inbox: Inbox,
    grace: Duration,
    next_id: u64,
    current: Option<Process>,
    last: Option<( Handle, ProcessStatus )>,
}


impl Supervisor {
    pub fn new( driver: Arc<dyn PlayerDriver>, inbox: Inbox, grace: Duration ) -> Self {
        Self {
            driver,
            inbox,
            grace,
            next_id: 1,
            current: None,
            last: None,
        }
    }


    fn check_readable( locator: &str ) -> Result<(), SupervisorError> {
        if is_url( locator ) {
            return Ok(());
        }
        File::open( locator )
            .map( drop )
            .map_err( |source| SupervisorError::Spawn { locator: locator.to_string(), source } )
    }


    fn write_line( stdin: &SharedStdin, line: &str ) -> std::io::Result<()> {
        let mut guard = lock( stdin );
        let pipe = guard
            .as_mut()
            .ok_or_else( || std::io::Error::from( std::io::ErrorKind::BrokenPipe ) )?;
        writeln!( pipe, "{}", line )?;
        pipe.flush()
    }


    fn deliver( &self, process: &Process, wire: Wire ) -> Delivery {
        match wire {
            Wire::Line( line ) => match Self::write_line( &process.stdin, &line ) {
                Ok(()) => Delivery::Sent,
                Err( e ) => {
                    tracing::debug!( "Write to {:?} failed: {}", process.handle, e );
                    Delivery::Stale
                }
            },
            Wire::Signal( signal ) => match process.signal( signal ) {
                Ok(()) => Delivery::Sent,
                Err( e ) => {
                    tracing::debug!( "Signal {} to {:?} failed: {}", signal, process.handle, e );
                    Delivery::Stale
                }
            },
            Wire::Unsupported => Delivery::Unsupported,
        }
    }


    fn wait_exit( process: &Process, grace: Duration ) -> Result<ProcessStatus, SupervisorError> {
        process.exit
            .wait( grace )
            .ok_or( SupervisorError::TerminationTimeout { handle: process.handle, grace } )
    }
}


impl Supervise for Supervisor {
    fn start( &mut self, locator: &str, offset: Duration ) -> Result<Handle, SupervisorError> {
        if let Some( old ) = self.current.as_ref().map( |p| p.handle ) {
            tracing::warn!( "Starting a player while {:?} is still tracked", old );
            self.terminate( old )?;
        }

        if !self.driver.accepts( locator ) {
            return Err( SupervisorError::Unsupported( locator.to_string() ) );
        }
        Self::check_readable( locator )?;

        let mut cmd = self.driver.command( locator, offset );
        driver::stdio( &mut cmd, self.driver.as_ref() );
        cmd.process_group( 0 );

        let mut child = cmd
            .spawn()
            .map_err( |source| SupervisorError::Spawn { locator: locator.to_string(), source } )?;

        let handle = Handle( self.next_id );
        self.next_id += 1;
        let pid = Pid::from_raw( child.id() as i32 );
        tracing::info!( "Started {} for {} ({:?}, pid {})", self.driver.name(), locator, handle, pid );

        let stdin: SharedStdin = Arc::new( Mutex::new( child.stdin.take() ) );
        for line in self.driver.preamble( locator, offset ) {
            if let Err( e ) = Self::write_line( &stdin, &line ) {
                tracing::warn!( "Failed to send {:?} to player: {}", line, e );
            }
        }

        // Ready goes out before any event the threads below can produce.
        self.inbox.process( ProcessEvent::Ready( handle ) );

        let exit = Arc::new( ExitSlot::default() );
        let terminating = Arc::new( AtomicBool::new( false ) );

        if let Some( stdout ) = child.stdout.take() {
            let driver = Arc::clone( &self.driver );
            let inbox = self.inbox.clone();
            let stdin = Arc::clone( &stdin );
            thread::spawn( move || read_output( handle, stdout, driver, stdin, inbox ) );
        }

        {
            let exit = Arc::clone( &exit );
            let terminating = Arc::clone( &terminating );
            let inbox = self.inbox.clone();
            thread::spawn( move || watch( handle, child, exit, terminating, inbox ) );
        }

        self.current = Some( Process { handle, pid, stdin, exit, terminating } );
        Ok( handle )
    }


    fn send( &mut self, handle: Handle, control: Control ) -> Delivery {
        let Some( process ) = self.current.as_ref().filter( |p| p.handle == handle ) else {
            return Delivery::Stale;
        };
        if process.exit.get().is_some() {
            return Delivery::Stale;
        }
        let wire = self.driver.encode( control );
        tracing::debug!( "{:?} -> {:?}: {:?}", control, handle, wire );
        self.deliver( process, wire )
    }


    fn poll( &mut self ) -> Option<( Handle, ProcessStatus )> {
        match &self.current {
            Some( p ) => Some( ( p.handle, p.exit.get().unwrap_or( ProcessStatus::Running ) ) ),
            None => self.last,
        }
    }


    fn terminate( &mut self, handle: Handle ) -> Result<ProcessStatus, SupervisorError> {
        let Some( process ) = self.current.take_if( |p| p.handle == handle ) else {
            return Ok( match self.last {
                Some( ( h, status ) ) if h == handle => status,
                _ => ProcessStatus::Killed,
            });
        };

        let status = match process.exit.get() {
            Some( status ) => status,
            None => {
                process.terminating.store( true, Ordering::SeqCst );
                // A stopped process cannot act on a quit request.
                let _ = process.signal( Signal::SIGCONT );
                let quit = self.driver.encode( Control::Terminate );
                self.deliver( &process, quit );

                match Self::wait_exit( &process, self.grace ) {
                    Ok( status ) => status,
                    Err( e ) => {
                        tracing::warn!( "{}, killing process group", e );
                        if let Err( e ) = process.signal( Signal::SIGKILL ) {
                            tracing::error!( "Failed to kill {:?}: {}", handle, e );
                        }
                        process.exit.wait( self.grace ).unwrap_or( ProcessStatus::Killed )
                    }
                }
            }
        };

        lock( &process.stdin ).take();
        tracing::debug!( "Terminated {:?}: {:?}", handle, status );
        self.last = Some( ( handle, status ) );
        Ok( status )
    }


    fn restart_seeks( &self ) -> bool {
        self.driver.restart_seeks()
    }
}


impl Drop for Supervisor {
    fn drop( &mut self ) {
        if let Some( handle ) = self.current.as_ref().map( |p| p.handle ) {
            if let Err( e ) = self.terminate( handle ) {
                tracing::error!( "Failed to stop player on shutdown: {}", e );
            }
        }
    }
}


/// Maps a wait status onto [`ProcessStatus`].
fn classify( status: ExitStatus, terminating: bool ) -> ProcessStatus {
    match ( status.code(), status.signal() ) {
        ( Some( 0 ), _ ) => ProcessStatus::ExitedNormally,
        _ if terminating => ProcessStatus::Killed,
        ( Some( code ), _ ) => ProcessStatus::ExitedError( code ),
        ( None, Some( signo ) ) => ProcessStatus::ExitedError( 128 + signo ),
        ( None, None ) => ProcessStatus::ExitedError( -1 ),
    }
}


/// Watcher thread: blocks until the process exits.
fn watch(
    handle: Handle,
    mut child: Child,
    exit: Arc<ExitSlot>,
    terminating: Arc<AtomicBool>,
    inbox: Inbox,
) {
    let status = match child.wait() {
        Ok( status ) => classify( status, terminating.load( Ordering::SeqCst ) ),
        Err( e ) => {
            tracing::error!( "Failed to wait for {:?}: {}", handle, e );
            ProcessStatus::ExitedError( -1 )
        }
    };

    match status {
        ProcessStatus::ExitedError( code ) => tracing::warn!( "Player {:?} exited with {}", handle, code ),
        _ => tracing::debug!( "Player {:?} exited: {:?}", handle, status ),
    }

    exit.set( status );
    inbox.process( ProcessEvent::Exited { handle, status } );
}


/// Reader thread: splits stdout on `\r` and `\n` and forwards reports.
fn read_output(
    handle: Handle,
    mut stdout: ChildStdout,
    driver: Arc<dyn PlayerDriver>,
    stdin: SharedStdin,
    inbox: Inbox,
) {
    let mut buf = [ 0u8; 4096 ];
    let mut line = Vec::new();
    let mut last_sent: Option<( u64, Option<Duration> )> = None;

    loop {
        let n = match stdout.read( &mut buf ) {
            Ok( 0 ) => break,
            Ok( n ) => n,
            Err( e ) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err( _ ) => break,
        };

        for &byte in &buf[ ..n ] {
            if byte != b'\r' && byte != b'\n' {
                line.push( byte );
                continue;
            }
            if line.is_empty() {
                continue;
            }

            let text = String::from_utf8_lossy( &line );
            match driver.parse_line( &text ) {
                Some( Report::Progress { position, length } ) => {
                    // One event per displayed second.
                    let key = ( position.as_secs(), length );
                    if last_sent != Some( key ) {
                        last_sent = Some( key );
                        inbox.process( ProcessEvent::Progress { handle, position, length } );
                    }
                }
                Some( Report::Finished ) => {
                    tracing::debug!( "Player {:?} finished its track", handle );
                    if let Wire::Line( quit ) = driver.encode( Control::Terminate ) {
                        if let Err( e ) = Supervisor::write_line( &stdin, &quit ) {
                            tracing::debug!( "Failed to send quit to {:?}: {}", handle, e );
                        }
                    }
                }
                None => {}
            }
            line.clear();
        }
    }
}


#[cfg( test )]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::process::Command;

    use super::*;
    use crate::dispatch::{ Dispatcher, Event, Queue, Source };
    use crate::driver::Template;


    const WAIT: Duration = Duration::from_secs( 10 );
    const URL: &str = "http://radio.example/stream";


    fn supervisor( template: &str, grace: Duration ) -> ( Supervisor, Queue ) {
        let dispatcher = Dispatcher::new();
        let inbox = dispatcher.inbox( Source::Subprocess );
        let driver = Template::new( template, Vec::new() ).unwrap();
        ( Supervisor::new( Arc::new( driver ), inbox, grace ), dispatcher.into_receiver() )
    }


    fn next_event( queue: &Queue ) -> ProcessEvent {
        match queue.recv_timeout( WAIT ).expect( "no event" ).event {
            Event::Process( event ) => event,
            other => panic!( "unexpected event {:?}", other ),
        }
    }


    fn exit_of( queue: &Queue ) -> ( Handle, ProcessStatus ) {
        loop {
            if let ProcessEvent::Exited { handle, status } = next_event( queue ) {
                return ( handle, status );
            }
        }
    }


    /// Driver speaking a tiny line protocol, run through `sh -c`.
    struct Scripted( &'static str );


    impl PlayerDriver for Scripted {
        fn name( &self ) -> &str {
            "scripted"
        }

        fn command( &self, _locator: &str, _offset: Duration ) -> Command {
            let mut cmd = Command::new( "sh" );
            cmd.arg( "-c" ).arg( self.0 );
            cmd
        }

        fn uses_stdin( &self ) -> bool {
            true
        }

        fn encode( &self, control: Control ) -> Wire {
            match control {
                Control::Terminate => Wire::Line( "quit".into() ),
                Control::Pause => Wire::Line( "pause".into() ),
                _ => Wire::Unsupported,
            }
        }

        fn parse_line( &self, line: &str ) -> Option<Report> {
            if line == "END" {
                return Some( Report::Finished );
            }
            let secs = line.strip_prefix( "P " )?.parse().ok()?;
            Some( Report::Progress { position: Duration::from_secs( secs ), length: None } )
        }
    }


    #[test]
    fn test_natural_exit() {
        let ( mut sup, queue ) = supervisor( "true", DEFAULT_GRACE );
        let handle = sup.start( URL, Duration::ZERO ).unwrap();

        assert_eq!( next_event( &queue ), ProcessEvent::Ready( handle ) );
        assert_eq!( exit_of( &queue ), ( handle, ProcessStatus::ExitedNormally ) );
        assert_eq!( sup.poll(), Some( ( handle, ProcessStatus::ExitedNormally ) ) );
        assert_eq!( sup.send( handle, Control::Pause ), Delivery::Stale );
    }


    #[test]
    fn test_error_exit_is_reported() {
        let ( mut sup, queue ) = supervisor( "false", DEFAULT_GRACE );
        let handle = sup.start( URL, Duration::ZERO ).unwrap();
        assert_eq!( exit_of( &queue ), ( handle, ProcessStatus::ExitedError( 1 ) ) );
    }


    #[test]
    fn test_spawn_failures() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join( "a.ogg" );
        std::fs::write( &track, b"" ).unwrap();

        let ( mut sup, _queue ) = supervisor( "definitely-not-a-player-7f3a {file}", DEFAULT_GRACE );
        assert!( matches!(
            sup.start( track.to_str().unwrap(), Duration::ZERO ),
            Err( SupervisorError::Spawn { .. } )
        ));

        let ( mut sup, _queue ) = supervisor( "true", DEFAULT_GRACE );
        assert!( matches!(
            sup.start( "/nonexistent/a.ogg", Duration::ZERO ),
            Err( SupervisorError::Spawn { .. } )
        ));
    }


    #[test]
    fn test_terminate_then_stale() {
        let ( mut sup, queue ) = supervisor( "sleep 30", DEFAULT_GRACE );
        let handle = sup.start( URL, Duration::ZERO ).unwrap();

        assert_eq!( sup.send( handle, Control::Pause ), Delivery::Sent );
        assert_eq!( sup.send( handle, Control::Resume ), Delivery::Sent );
        assert_eq!( sup.send( handle, Control::SetVolume( 10 ) ), Delivery::Unsupported );

        // Terminating a stopped process still works.
        assert_eq!( sup.send( handle, Control::Pause ), Delivery::Sent );
        assert_eq!( sup.terminate( handle ).unwrap(), ProcessStatus::Killed );
        assert_eq!( sup.send( handle, Control::Resume ), Delivery::Stale );
        assert_eq!( sup.poll(), Some( ( handle, ProcessStatus::Killed ) ) );
        assert_eq!( exit_of( &queue ), ( handle, ProcessStatus::Killed ) );

        // Idempotent.
        assert_eq!( sup.terminate( handle ).unwrap(), ProcessStatus::Killed );
    }


    #[test]
    fn test_terminate_escalates_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join( "stubborn.sh" );
        std::fs::write( &script, "#!/bin/sh\ntrap '' INT\nsleep 30\n" ).unwrap();
        std::fs::set_permissions( &script, std::fs::Permissions::from_mode( 0o755 ) ).unwrap();

        let ( mut sup, queue ) = supervisor( script.to_str().unwrap(), Duration::from_millis( 200 ) );
        let handle = sup.start( URL, Duration::ZERO ).unwrap();
        assert_eq!( next_event( &queue ), ProcessEvent::Ready( handle ) );

        assert_eq!( sup.terminate( handle ).unwrap(), ProcessStatus::Killed );
        assert_eq!( exit_of( &queue ), ( handle, ProcessStatus::Killed ) );
    }


    #[test]
    fn test_progress_and_finished_marker() {
        let dispatcher = Dispatcher::new();
        let inbox = dispatcher.inbox( Source::Subprocess );
        let queue = dispatcher.into_receiver();
        let script = r#"printf 'P 3\rP 3\rP 4\n'; printf 'END\n'; read line; [ "$line" = quit ] && exit 0; exit 3"#;
        let mut sup = Supervisor::new( Arc::new( Scripted( script ) ), inbox, DEFAULT_GRACE );

        let handle = sup.start( URL, Duration::ZERO ).unwrap();
        assert_eq!( next_event( &queue ), ProcessEvent::Ready( handle ) );
        assert_eq!(
            next_event( &queue ),
            ProcessEvent::Progress { handle, position: Duration::from_secs( 3 ), length: None }
        );
        assert_eq!(
            next_event( &queue ),
            ProcessEvent::Progress { handle, position: Duration::from_secs( 4 ), length: None }
        );
        assert_eq!( exit_of( &queue ), ( handle, ProcessStatus::ExitedNormally ) );
    }


    #[test]
    fn test_classify_signal_death() {
        let crashed = ExitStatus::from_raw( Signal::SIGSEGV as i32 );
        assert_eq!( classify( crashed, false ), ProcessStatus::ExitedError( 128 + 11 ) );
        assert_eq!( classify( crashed, true ), ProcessStatus::Killed );
        assert_eq!( classify( ExitStatus::from_raw( 0 ), true ), ProcessStatus::ExitedNormally );
        assert_eq!( classify( ExitStatus::from_raw( 2 << 8 ), false ), ProcessStatus::ExitedError( 2 ) );
    }
}
