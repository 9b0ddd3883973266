//! Playback controller.
//!
//! The single owner of playback state. It consumes envelopes from the
//! dispatcher one at a time, mutates the entry store, drives the
//! supervisor and publishes a [`Status`] snapshot for the renderer after
//! every envelope.
//!
//! State transitions:
//!
//! | From           | Event              | To                |
//! |----------------|--------------------|-------------------|
//! | idle           | play               | loading           |
//! | loading        | ready              | playing           |
//! | loading        | spawn failure      | next entry / idle |
//! | playing        | pause              | paused            |
//! | paused         | resume             | playing           |
//! | playing/paused | next/prev          | stopping->loading |
//! | playing/paused | exited             | idle->loading     |
//! | any            | stop               | stopping->idle    |

use std::fmt;
use std::path::Path;
use std::sync::{ Arc, RwLock };
use std::time::{ Duration, Instant };

use rand::rngs::StdRng;
use rand::SeedableRng;
use regex::{ Regex, RegexBuilder };
use thiserror::Error;

use crate::command::{ Command, SeekTarget, VolumeChange };
use crate::dispatch::{ Envelope, Event, Queue };
use crate::driver::Control;
use crate::entry::{ Entry, EntryKind };
use crate::filelist;
use crate::mode::{ PlaybackMode, TrackSelector };
use crate::playlist;
use crate::store::{ self, EntryStore, ListId, Motion, StoreError };
use crate::supervisor::{ Delivery, Handle, ProcessEvent, ProcessStatus, Supervise, SupervisorError };
use crate::tags::TagReader;
use crate::{ read_lock, write_lock };


/// Playback state.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Stopping,
}


impl fmt::Display for PlaybackState {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( match self {
            PlaybackState::Idle => "Stopped",
            PlaybackState::Loading => "Loading",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
            PlaybackState::Stopping => "Stopping",
        })
    }
}


/// Errors reported to the user by the controller.
#[derive( Debug, Clone, Error, PartialEq, Eq )]
pub enum ControlError {
    #[error( "Playlist is empty" )]
    EmptyPlaylist,

    #[error( "No playable entries" )]
    NothingPlayable,

    #[error( "Seeking is not supported by this player" )]
    SeekUnsupported,

    #[error( "Volume control is not supported by this player" )]
    VolumeUnsupported,
}


/// Whether the controller keeps consuming.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Flow {
    Continue,
    Quit,
}


/// Track position that keeps running between progress reports.
#[derive( Debug, Clone, Copy, Default, PartialEq, Eq )]
pub struct PlayClock {
    base: Duration,
    started: Option<Instant>,
}


impl PlayClock {
    /// A stopped clock reading `base`.
    pub fn at( base: Duration ) -> Self {
        Self { base, started: None }
    }


    pub fn position( &self ) -> Duration {
        self.base + self.started.map( |s| s.elapsed() ).unwrap_or_default()
    }


    fn start( &mut self ) {
        if self.started.is_none() {
            self.started = Some( Instant::now() );
        }
    }


    fn pause( &mut self ) {
        self.base = self.position();
        self.started = None;
    }


    fn sync( &mut self, position: Duration, running: bool ) {
        self.base = position;
        self.started = running.then( Instant::now );
    }
}


/// A status line message.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Message {
    /// Increases with every message, so repeats can be told apart.
    pub seq: u64,
    pub text: String,
    pub error: bool,
}


/// Snapshot published for the renderer.
#[derive( Debug, Clone, Default )]
pub struct Status {
    pub state: PlaybackState,
    pub mode: PlaybackMode,
    pub volume: u8,
    pub now_playing: Option<Arc<Entry>>,
    pub clock: PlayClock,
    pub length: Option<Duration>,
    pub message: Option<Message>,
    pub shutdown: bool,
}


#[derive( Debug, Clone, Copy, PartialEq, Eq )]
enum Direction {
    Forward,
    Backward,
}


#[derive( Debug )]
struct Current {
    handle: Handle,
    entry: Arc<Entry>,
    /// False once the entry is no longer part of the playlist, or if it
    /// was played straight from the filelist.
    in_playlist: bool,
}


/// The playback state machine.
pub struct Controller<S: Supervise> {
    supervisor: S,
    store: Arc<RwLock<EntryStore>>,
    status: Arc<RwLock<Status>>,
    tags: Arc<dyn TagReader>,
    state: PlaybackState,
    mode: PlaybackMode,
    current: Option<Current>,
    selector: TrackSelector,
    rng: StdRng,
    volume: u8,
    volume_set: bool,
    clock: PlayClock,
    length: Option<Duration>,
    failures: usize,
    message: Option<Message>,
    shutdown: bool,
}


impl<S: Supervise> Controller<S> {
    pub fn new( supervisor: S, store: Arc<RwLock<EntryStore>>, tags: Arc<dyn TagReader> ) -> Self {
        Self {
            supervisor,
            store,
            status: Arc::new( RwLock::new( Status { volume: 100, ..Status::default() } ) ),
            tags,
            state: PlaybackState::Idle,
            mode: PlaybackMode::default(),
            current: None,
            selector: TrackSelector::new(),
            rng: StdRng::from_os_rng(),
            volume: 100,
            volume_set: false,
            clock: PlayClock::default(),
            length: None,
            failures: 0,
            message: None,
            shutdown: false,
        }
    }


    pub fn with_mode( mut self, mode: PlaybackMode ) -> Self {
        self.mode = mode;
        self.publish();
        self
    }


    /// Starting volume, applied to every player once it is ready.
    pub fn with_volume( mut self, volume: u8 ) -> Self {
        self.volume = VolumeChange::Set( volume ).apply( self.volume );
        self.volume_set = true;
        self.publish();
        self
    }


    pub fn with_selector( mut self, selector: TrackSelector ) -> Self {
        self.selector = selector;
        self
    }


    /// Shared status snapshot.
    pub fn status( &self ) -> Arc<RwLock<Status>> {
        Arc::clone( &self.status )
    }


    pub fn state( &self ) -> PlaybackState {
        self.state
    }


    pub fn mode( &self ) -> PlaybackMode {
        self.mode
    }


    pub fn supervisor( &self ) -> &S {
        &self.supervisor
    }


    /// Consumes the queue until a quit command, then stops playback.
    pub fn run( mut self, queue: Queue ) {
        tracing::info!( "Controller started" );
        while let Some( envelope ) = queue.recv() {
            if self.handle( envelope ) == Flow::Quit {
                break;
            }
        }
        self.stop();
        self.shutdown = true;
        self.publish();
        tracing::info!( "Controller stopped" );
    }


    /// Applies one envelope and publishes the new status.
    pub fn handle( &mut self, envelope: Envelope ) -> Flow {
        tracing::trace!( "#{} from {:?}: {:?}", envelope.seq, envelope.source, envelope.event );

        let flow = match envelope.event {
            Event::Command( command ) => self.apply( command ),
            Event::Process( event ) => {
                self.on_process( event );
                Flow::Continue
            }
        };
        self.publish();
        flow
    }


    fn apply( &mut self, command: Command ) -> Flow {
        match command {
            Command::Play => self.play(),
            Command::PlaySelected { list } => self.play_selected( list ),
            Command::TogglePause => match self.state {
                PlaybackState::Playing => self.pause(),
                PlaybackState::Paused => self.resume(),
                _ => {}
            },
            Command::Resume => {
                if self.state == PlaybackState::Paused {
                    self.resume();
                }
            }
            Command::Stop => self.stop(),
            Command::ToggleStop => {
                if self.state == PlaybackState::Idle {
                    self.play();
                } else {
                    self.stop();
                }
            }
            Command::Next => self.skip( Direction::Forward ),
            Command::Prev => self.skip( Direction::Backward ),
            Command::Seek( target ) => self.seek( target ),
            Command::Volume( change ) => self.set_volume( change ),
            Command::Repeat( repeat ) => {
                self.mode.repeat = repeat.unwrap_or( self.mode.repeat.cycle() );
                self.note( format!( "Repeat: {}", self.mode.repeat ) );
            }
            Command::Shuffle( on ) => {
                self.mode.shuffle = on.unwrap_or( !self.mode.shuffle );
                self.selector.reset();
                self.note( format!( "Shuffle: {}", on_off( self.mode.shuffle ) ) );
            }
            Command::StopAfter => {
                self.mode.stop_after = !self.mode.stop_after;
                self.note( format!( "Stop after track: {}", on_off( self.mode.stop_after ) ) );
            }

            Command::Add { path } => self.add( &path ),
            Command::AddSelected => self.add_selected(),
            Command::Load { path } => self.load( &path ),
            Command::Remove => self.remove_selected(),
            Command::Clear => {
                write_lock( &self.store ).playlist.clear();
                self.detach_current();
                self.note( "Playlist cleared" );
            }
            Command::MoveSelected { delta } => self.move_selected( delta ),
            Command::Sort => self.sort(),
            Command::Scramble => {
                write_lock( &self.store ).playlist.scramble( &mut self.rng );
                self.note( "Playlist scrambled" );
            }
            Command::Save { path } => self.save( &path ),
            Command::JumpToActive => {
                let mut store = write_lock( &self.store );
                if let Some( index ) = store.playlist.now_playing() {
                    if let Err( e ) = store.playlist.set_cursor( index ) {
                        invariant( e );
                    }
                }
            }

            Command::ToggleMark { list } => {
                write_lock( &self.store ).list_mut( list ).toggle_mark_selected();
            }
            Command::SetMark { list, marked } => {
                write_lock( &self.store ).list_mut( list ).mark_selected( marked );
            }
            Command::InvertMarks { list } => {
                write_lock( &self.store ).list_mut( list ).invert_marks();
            }
            Command::MarkMatching { list, pattern, marked } => {
                match pattern_of( &pattern ) {
                    Ok( regex ) => {
                        let count = write_lock( &self.store ).list_mut( list ).mark_matching( &regex, marked );
                        let verb = if marked { "Marked" } else { "Unmarked" };
                        self.note( format!( "{} {} entries", verb, count ) );
                    }
                    Err( e ) => self.fail( e ),
                }
            }

            Command::Cursor { list, motion } => {
                write_lock( &self.store ).list_mut( list ).move_cursor( motion );
            }
            Command::Search { list, term, forward } => self.search( list, &term, forward ),
            Command::Goto { path } => {
                let result = write_lock( &self.store ).chdir( Path::new( &path ) );
                self.store_result( result );
            }
            Command::Parent => {
                let result = write_lock( &self.store ).parent();
                self.store_result( result );
            }
            Command::Refresh => {
                write_lock( &self.store ).refresh();
            }
            Command::FindRecursive { pattern } => self.find_recursive( &pattern ),
            Command::SetBookmark( key ) => {
                write_lock( &self.store ).set_bookmark( key );
                self.note( format!( "Bookmark '{}' set", key ) );
            }
            Command::GotoBookmark( key ) => {
                let result = write_lock( &self.store ).goto_bookmark( key );
                self.store_result( result );
            }

            Command::Quit => {
                self.stop();
                self.shutdown = true;
                return Flow::Quit;
            }
        }
        Flow::Continue
    }


    fn on_process( &mut self, event: ProcessEvent ) {
        match event {
            ProcessEvent::Ready( handle ) => {
                if !self.is_current( handle ) || self.state != PlaybackState::Loading {
                    tracing::debug!( "Ignoring ready from stale {:?}", handle );
                    return;
                }
                self.state = PlaybackState::Playing;
                self.clock.start();
                if self.volume_set {
                    let delivery = self.supervisor.send( handle, Control::SetVolume( self.volume ) );
                    tracing::debug!( "Volume {} -> {:?}: {:?}", self.volume, handle, delivery );
                }
            }
            ProcessEvent::Progress { handle, position, length } => {
                if !self.is_current( handle ) {
                    return;
                }
                self.failures = 0;
                self.clock.sync( position, self.state == PlaybackState::Playing );
                if length.is_some() {
                    self.length = length;
                }
            }
            ProcessEvent::Exited { handle, status } => {
                if !self.is_current( handle ) {
                    tracing::debug!( "Ignoring exit of stale {:?}", handle );
                    return;
                }
                let Some( finished ) = self.current.take() else { return };
                if let Err( e ) = self.supervisor.terminate( handle ) {
                    tracing::error!( "Failed to retire {:?}: {}", handle, e );
                }
                self.state = PlaybackState::Idle;
                self.clock = PlayClock::default();

                match status {
                    ProcessStatus::ExitedNormally => {
                        self.failures = 0;
                        self.track_ended( &finished );
                    }
                    ProcessStatus::ExitedError( code ) => {
                        self.failures += 1;
                        self.track_ended( &finished );
                        self.fail( format!( "Player exited with code {}: {}", code, finished.entry.file_name() ) );
                    }
                    ProcessStatus::Killed | ProcessStatus::Running => {}
                }
            }
        }
    }


    fn play( &mut self ) {
        match self.state {
            PlaybackState::Paused => self.resume(),
            PlaybackState::Playing | PlaybackState::Loading => {}
            PlaybackState::Idle | PlaybackState::Stopping => {
                let start = {
                    let store = read_lock( &self.store );
                    let list = &store.playlist;
                    ( !list.is_empty() ).then( || list.now_playing().or( list.cursor() ).unwrap_or( 0 ) )
                };
                match start {
                    Some( index ) => {
                        self.failures = 0;
                        self.play_from( index, Direction::Forward );
                    }
                    None => self.fail( ControlError::EmptyPlaylist ),
                }
            }
        }
    }


    fn play_selected( &mut self, list: ListId ) {
        match list {
            ListId::Playlist => {
                let cursor = read_lock( &self.store ).playlist.cursor();
                match cursor {
                    Some( index ) => {
                        self.failures = 0;
                        self.play_from( index, Direction::Forward );
                    }
                    None => self.fail( ControlError::EmptyPlaylist ),
                }
            }
            ListId::Filelist => {
                let selected = read_lock( &self.store ).filelist.selected().cloned();
                let Some( entry ) = selected else { return };

                match entry.kind() {
                    EntryKind::Directory if entry.is_parent_link() => {
                        let result = write_lock( &self.store ).parent();
                        self.store_result( result );
                    }
                    EntryKind::Directory => {
                        let result = write_lock( &self.store ).chdir( Path::new( entry.locator() ) );
                        self.store_result( result );
                    }
                    EntryKind::Playlist => self.add( entry.locator() ),
                    EntryKind::LocalFile | EntryKind::Url => {
                        self.failures = 0;
                        if let Err( e ) = self.start_entry( entry, None, Duration::ZERO ) {
                            self.fail( e );
                        }
                    }
                }
            }
        }
    }


    /// Starts the playlist entry at `index`, moving on past entries that
    /// fail to start until every entry has failed.
    fn play_from( &mut self, index: usize, direction: Direction ) {
        let mut index = index;
        loop {
            let ( entry, len ) = {
                let store = read_lock( &self.store );
                ( store.playlist.get( index ).cloned(), store.playlist.len() )
            };
            let Some( entry ) = entry else {
                invariant( StoreError::OutOfRange { index, len } );
                self.stop();
                return;
            };
            if self.failures >= len {
                self.stop();
                self.fail( ControlError::NothingPlayable );
                return;
            }

            match self.start_entry( entry, Some( index ), Duration::ZERO ) {
                Ok(()) => return,
                Err( e ) => {
                    self.failures += 1;
                    self.fail( e );
                    match self.pick( direction, Some( index ) ) {
                        Some( next ) => index = next,
                        None => return,
                    }
                }
            }
        }
    }


    /// Terminates whatever plays and starts `entry`.
    ///
    /// @param index - Playlist position, or None for an entry outside the playlist
    fn start_entry( &mut self, entry: Arc<Entry>, index: Option<usize>, offset: Duration ) -> Result<(), SupervisorError> {
        self.retire_current();

        if !entry.kind().is_playable() {
            return Err( SupervisorError::Unsupported( entry.locator().to_string() ) );
        }

        let handle = self.supervisor.start( entry.locator(), offset )?;
        tracing::info!( "Playing: {}", entry.locator() );

        let generation = {
            let mut store = write_lock( &self.store );
            if let Err( e ) = store.playlist.set_now_playing( index ) {
                invariant( e );
            }
            store.playlist.generation()
        };
        if let Some( index ) = index {
            self.selector.sync( generation, None );
            self.selector.mark( index );
        }

        self.length = entry.duration( self.tags.as_ref() );
        self.clock = PlayClock::at( offset );
        self.state = PlaybackState::Loading;
        let title = entry.title( self.tags.as_ref() );
        self.current = Some( Current { handle, entry, in_playlist: index.is_some() } );
        self.note( format!( "Playing: {}", title ) );
        Ok(())
    }


    /// Terminates the current process, if any. Leaves the state idle.
    fn retire_current( &mut self ) {
        if let Some( current ) = self.current.take() {
            self.state = PlaybackState::Stopping;
            if let Err( e ) = self.supervisor.terminate( current.handle ) {
                tracing::error!( "Failed to stop {:?}: {}", current.handle, e );
            }
        }
        self.state = PlaybackState::Idle;
    }


    fn stop( &mut self ) {
        self.retire_current();
        self.clock = PlayClock::default();
    }


    fn pause( &mut self ) {
        let Some( handle ) = self.current.as_ref().map( |c| c.handle ) else { return };
        match self.supervisor.send( handle, Control::Pause ) {
            Delivery::Sent => {
                self.state = PlaybackState::Paused;
                self.clock.pause();
            }
            Delivery::Stale => tracing::debug!( "Pause for stale {:?}", handle ),
            Delivery::Unsupported => self.fail( "Pausing is not supported by this player" ),
        }
    }


    fn resume( &mut self ) {
        let Some( handle ) = self.current.as_ref().map( |c| c.handle ) else { return };
        match self.supervisor.send( handle, Control::Resume ) {
            Delivery::Sent => {
                self.state = PlaybackState::Playing;
                self.clock.start();
            }
            Delivery::Stale => tracing::debug!( "Resume for stale {:?}", handle ),
            Delivery::Unsupported => self.fail( "Resuming is not supported by this player" ),
        }
    }


    fn skip( &mut self, direction: Direction ) {
        let current = {
            let store = read_lock( &self.store );
            if store.playlist.is_empty() {
                None
            } else {
                Some( store.playlist.now_playing() )
            }
        };
        let Some( current ) = current else {
            self.fail( ControlError::EmptyPlaylist );
            return;
        };

        self.failures = 0;
        match self.pick( direction, current ) {
            Some( index ) => self.play_from( index, direction ),
            None => {
                self.stop();
                self.note( "End of playlist" );
            }
        }
    }


    /// Next or previous playlist index per the current mode.
    fn pick( &mut self, direction: Direction, current: Option<usize> ) -> Option<usize> {
        let ( len, generation ) = {
            let store = read_lock( &self.store );
            ( store.playlist.len(), store.playlist.generation() )
        };
        self.selector.sync( generation, current );
        match direction {
            Direction::Forward => self.selector.next( self.mode, current, len ),
            Direction::Backward => self.selector.prev( self.mode, current, len ),
        }
    }


    fn track_ended( &mut self, finished: &Current ) {
        if !finished.in_playlist {
            tracing::debug!( "Finished {} outside the playlist", finished.entry.locator() );
            return;
        }
        if self.mode.stop_after {
            self.note( "Stopped after track" );
            return;
        }

        let current = read_lock( &self.store ).playlist.now_playing();
        match self.pick( Direction::Forward, current ) {
            Some( index ) => self.play_from( index, Direction::Forward ),
            None => self.note( "End of playlist" ),
        }
    }


    fn seek( &mut self, target: SeekTarget ) {
        if !matches!( self.state, PlaybackState::Playing | PlaybackState::Paused ) {
            return;
        }
        let Some( ( handle, entry, in_playlist ) ) = self.current
            .as_ref()
            .map( |c| ( c.handle, Arc::clone( &c.entry ), c.in_playlist ) )
        else {
            return;
        };

        let position = self.clock.position();
        let mut destination = match target {
            SeekTarget::Relative( secs ) if secs < 0 => position.saturating_sub( Duration::from_secs( secs.unsigned_abs() ) ),
            SeekTarget::Relative( secs ) => position + Duration::from_secs( secs as u64 ),
            SeekTarget::Absolute( at ) => at,
        };
        if let Some( length ) = self.length {
            destination = destination.min( length );
        }

        if self.supervisor.restart_seeks() {
            let index = if in_playlist { read_lock( &self.store ).playlist.now_playing() } else { None };
            tracing::debug!( "Restarting {} at {:?}", entry.locator(), destination );
            if let Err( e ) = self.start_entry( entry, index, destination ) {
                self.fail( e );
            }
            return;
        }

        match self.supervisor.send( handle, Control::Seek( target ) ) {
            Delivery::Sent => self.clock.sync( destination, self.state == PlaybackState::Playing ),
            Delivery::Stale => tracing::debug!( "Seek for stale {:?}", handle ),
            Delivery::Unsupported => self.fail( ControlError::SeekUnsupported ),
        }
    }


    fn set_volume( &mut self, change: VolumeChange ) {
        self.volume = change.apply( self.volume );
        self.volume_set = true;

        if matches!( self.state, PlaybackState::Playing | PlaybackState::Paused ) {
            if let Some( handle ) = self.current.as_ref().map( |c| c.handle ) {
                if self.supervisor.send( handle, Control::SetVolume( self.volume ) ) == Delivery::Unsupported {
                    self.fail( ControlError::VolumeUnsupported );
                    return;
                }
            }
        }
        self.note( format!( "Volume: {}%", self.volume ) );
    }


    fn add( &mut self, path: &str ) {
        match filelist::expand( path ) {
            Ok( locators ) => {
                let added = write_lock( &self.store ).playlist.append_locators( locators );
                self.note( format!( "Added {} entries", added ) );
            }
            Err( e ) => self.fail( e ),
        }
    }


    /// Adds the marked filelist entries, or the selected one when none
    /// is marked.
    fn add_selected( &mut self ) {
        let marked = read_lock( &self.store ).filelist.marked_entries();
        if !marked.is_empty() {
            return self.add_marked( marked );
        }

        let selected = read_lock( &self.store ).filelist.selected().cloned();
        let Some( entry ) = selected else { return };
        if entry.is_parent_link() {
            return;
        }
        self.add( entry.locator() );
        write_lock( &self.store ).filelist.move_cursor( Motion::Down );
    }


    fn add_marked( &mut self, marked: Vec<Arc<Entry>> ) {
        let mut added = 0;
        let mut first_error = None;
        for entry in marked.iter().filter( |e| !e.is_parent_link() ) {
            match filelist::expand( entry.locator() ) {
                Ok( locators ) => added += write_lock( &self.store ).playlist.append_locators( locators ),
                Err( e ) => {
                    tracing::warn!( "Skipping {}: {}", entry.locator(), e );
                    first_error.get_or_insert( e );
                }
            }
        }
        write_lock( &self.store ).filelist.clear_marks();

        match first_error {
            Some( e ) => self.fail( e ),
            None => self.note( format!( "Added {} entries", added ) ),
        }
    }


    fn load( &mut self, path: &str ) {
        match filelist::expand( path ) {
            Ok( locators ) => {
                let entries: Vec<Entry> = locators.into_iter().map( Entry::new ).collect();
                let count = entries.len();
                write_lock( &self.store ).playlist.replace( entries, 0 );
                self.detach_current();
                self.note( format!( "Loaded {} entries", count ) );
            }
            Err( e ) => self.fail( e ),
        }
    }


    fn save( &mut self, path: &str ) {
        let result = {
            let store = read_lock( &self.store );
            playlist::save( Path::new( path ), store.playlist.list().iter().map( Arc::as_ref ) )
        };
        match result {
            Ok( written ) => self.note( format!( "Saved {}", written.display() ) ),
            Err( e ) => self.fail( e ),
        }
    }


    /// Removes the marked entries, or the selected one when none is
    /// marked. Removing the playing entry moves playback to its follower.
    fn remove_selected( &mut self ) {
        let removed = {
            let mut store = write_lock( &self.store );
            let list = &mut store.playlist;
            let playing = list.now_playing();
            if list.has_marks() {
                let removals = list.remove_marked();
                Some( ( playing, removals, list.len() ) )
            } else {
                match list.cursor().map( |pos| list.remove( pos ) ) {
                    Some( Ok( removal ) ) => Some( ( playing, vec![ removal ], list.len() ) ),
                    Some( Err( e ) ) => {
                        invariant( e );
                        None
                    }
                    None => None,
                }
            }
        };
        let Some( ( playing, removals, len ) ) = removed else { return };

        let active = matches!(
            self.state,
            PlaybackState::Loading | PlaybackState::Playing | PlaybackState::Paused
        );
        let in_playlist = self.current.as_ref().is_some_and( |c| c.in_playlist );
        // Removals are in list order, so this counts the removed entries
        // that stood before the playing one.
        let Some( before ) = removals.iter().position( |r| r.was_playing ) else { return };
        if !( active && in_playlist ) {
            return;
        }

        tracing::info!( "Removed the playing entry {}", removals[ before ].entry.locator() );
        let slot = playing.map_or( 0, |p| p.saturating_sub( before ) );
        if slot < len {
            self.failures = 0;
            self.play_from( slot, Direction::Forward );
        } else {
            self.stop();
        }
    }


    /// Moves the marked entries next to the selected one, or the selected
    /// entry by `delta` when none is marked.
    fn move_selected( &mut self, delta: isize ) {
        let mut store = write_lock( &self.store );
        if store.playlist.has_marks() {
            store.playlist.move_marked( delta > 0 );
            return;
        }

        let Some( from ) = store.playlist.cursor() else { return };
        let last = store.playlist.len() - 1;
        let to = from.saturating_add_signed( delta ).min( last );
        if let Err( e ) = store.playlist.move_entry( from, to ) {
            invariant( e );
        }
    }


    /// Reads every title first so that sorting under the lock needs no I/O.
    fn sort( &mut self ) {
        let entries = read_lock( &self.store ).playlist.list().to_vec();
        for entry in &entries {
            entry.tags( self.tags.as_ref() );
        }
        write_lock( &self.store ).playlist.sort( self.tags.as_ref() );
        self.note( "Playlist sorted" );
    }


    /// Matches titles with no lock held, then moves the cursor.
    fn search( &mut self, list: ListId, term: &str, forward: bool ) {
        let ( entries, cursor ) = {
            let store = read_lock( &self.store );
            let entries = store.list( list );
            ( entries.list().to_vec(), entries.cursor() )
        };
        match store::find( &entries, cursor, term, forward, self.tags.as_ref() ) {
            Some( index ) => {
                if let Err( e ) = write_lock( &self.store ).list_mut( list ).set_cursor( index ) {
                    invariant( e );
                }
            }
            None => self.fail( format!( "Not found: {}", term ) ),
        }
    }


    /// Lists every entry below the filelist directory whose name matches.
    fn find_recursive( &mut self, pattern: &str ) {
        let regex = match pattern_of( pattern ) {
            Ok( regex ) => regex,
            Err( e ) => return self.fail( e ),
        };
        let cwd = read_lock( &self.store ).cwd().to_path_buf();
        let found = filelist::search( &cwd, &regex );
        if found.is_empty() {
            return self.fail( format!( "Not found: {}", pattern ) );
        }

        let count = found.len();
        write_lock( &self.store ).show_search_results( found );
        self.note( format!( "Found {} entries", count ) );
    }


    /// The playing entry left the playlist; it finishes standalone.
    fn detach_current( &mut self ) {
        if let Some( current ) = self.current.as_mut() {
            current.in_playlist = false;
        }
    }


    fn is_current( &self, handle: Handle ) -> bool {
        self.current.as_ref().is_some_and( |c| c.handle == handle )
    }


    fn store_result( &mut self, result: Result<(), StoreError> ) {
        match result {
            Ok(()) => {}
            Err( e @ StoreError::OutOfRange { .. } ) => invariant( e ),
            Err( e ) => self.fail( e ),
        }
    }


    fn note( &mut self, text: impl Into<String> ) {
        self.post( text.into(), false );
    }


    fn fail( &mut self, error: impl fmt::Display ) {
        let text = error.to_string();
        tracing::warn!( "{}", text );
        self.post( text, true );
    }


    fn post( &mut self, text: String, error: bool ) {
        let seq = self.message.as_ref().map( |m| m.seq + 1 ).unwrap_or( 0 );
        self.message = Some( Message { seq, text, error } );
    }


    fn publish( &self ) {
        let mut status = write_lock( &self.status );
        status.state = self.state;
        status.mode = self.mode;
        status.volume = self.volume;
        status.now_playing = self.current.as_ref().map( |c| Arc::clone( &c.entry ) );
        status.clock = self.clock;
        status.length = self.length;
        status.message = self.message.clone();
        status.shutdown = self.shutdown;
    }
}


/// An index went out of range inside the controller: a bug, not a user error.
fn invariant( error: StoreError ) {
    tracing::error!( "Entry store invariant violated: {}", error );
    debug_assert!( false, "entry store invariant violated: {}", error );
}


/// Compiles a case-insensitive pattern.
fn pattern_of( pattern: &str ) -> Result<Regex, regex::Error> {
    RegexBuilder::new( pattern ).case_insensitive( true ).build()
}


fn on_off( on: bool ) -> &'static str {
    if on { "on" } else { "off" }
}


#[cfg( test )]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{ AtomicBool, Ordering };

    use super::*;
    use crate::dispatch::Source;
    use crate::mode::Repeat;
    use crate::tags::{ NoTags, Tags };


    #[derive( Debug, Clone, PartialEq, Eq )]
    enum Call {
        Start( String, Duration ),
        Send( Handle, Control ),
        Terminate( Handle ),
    }


    /// Records calls instead of running processes.
    #[derive( Debug, Default )]
    struct FakeSupervisor {
        calls: Vec<Call>,
        next: u64,
        live: Option<Handle>,
        failing: HashSet<String>,
        restart: bool,
        no_volume: bool,
    }


    impl Supervise for FakeSupervisor {
        fn start( &mut self, locator: &str, offset: Duration ) -> Result<Handle, SupervisorError> {
            self.calls.push( Call::Start( locator.to_string(), offset ) );
            if self.failing.contains( locator ) {
                return Err( SupervisorError::Spawn {
                    locator: locator.to_string(),
                    source: std::io::ErrorKind::NotFound.into(),
                });
            }
            self.next += 1;
            let handle = Handle( self.next );
            self.live = Some( handle );
            Ok( handle )
        }

        fn send( &mut self, handle: Handle, control: Control ) -> Delivery {
            if self.live != Some( handle ) {
                return Delivery::Stale;
            }
            if self.no_volume && matches!( control, Control::SetVolume( _ ) ) {
                return Delivery::Unsupported;
            }
            self.calls.push( Call::Send( handle, control ) );
            Delivery::Sent
        }

        fn poll( &mut self ) -> Option<( Handle, ProcessStatus )> {
            self.live.map( |h| ( h, ProcessStatus::Running ) )
        }

        fn terminate( &mut self, handle: Handle ) -> Result<ProcessStatus, SupervisorError> {
            self.calls.push( Call::Terminate( handle ) );
            if self.live == Some( handle ) {
                self.live = None;
            }
            Ok( ProcessStatus::Killed )
        }

        fn restart_seeks( &self ) -> bool {
            self.restart
        }
    }


    struct Rig {
        ctl: Controller<FakeSupervisor>,
        store: Arc<RwLock<EntryStore>>,
        dir: tempfile::TempDir,
    }


    impl Rig {
        fn new( names: &[&str] ) -> Self {
            Self::with( names, FakeSupervisor::default() )
        }


        fn with( names: &[&str], fake: FakeSupervisor ) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut store = EntryStore::new( dir.path().to_path_buf() );
            for name in names {
                store.playlist.push( Entry::with_kind( format!( "/m/{}", name ), EntryKind::LocalFile ) );
            }
            let store = Arc::new( RwLock::new( store ) );
            let ctl = Controller::new( fake, Arc::clone( &store ), Arc::new( NoTags ) )
                .with_selector( TrackSelector::seeded( 11 ) );
            Self { ctl, store, dir }
        }


        fn send( &mut self, command: Command ) -> Flow {
            self.ctl.handle( Envelope { seq: 0, source: Source::Keyboard, event: Event::Command( command ) } )
        }


        fn event( &mut self, event: ProcessEvent ) {
            self.ctl.handle( Envelope { seq: 0, source: Source::Subprocess, event: Event::Process( event ) } );
        }


        fn live( &self ) -> Handle {
            self.ctl.supervisor().live.expect( "no live process" )
        }


        fn ready( &mut self ) {
            let handle = self.live();
            self.event( ProcessEvent::Ready( handle ) );
        }


        fn finish( &mut self ) {
            let handle = self.live();
            self.event( ProcessEvent::Ready( handle ) );
            self.event( ProcessEvent::Exited { handle, status: ProcessStatus::ExitedNormally } );
        }


        fn calls( &self ) -> &[Call] {
            &self.ctl.supervisor().calls
        }


        fn starts( &self ) -> Vec<String> {
            self.calls()
                .iter()
                .filter_map( |c| match c {
                    Call::Start( locator, _ ) => Some( locator.trim_start_matches( "/m/" ).to_string() ),
                    _ => None,
                })
                .collect()
        }


        fn now_playing( &self ) -> Option<usize> {
            self.store.read().unwrap().playlist.now_playing()
        }


        fn state( &self ) -> PlaybackState {
            self.ctl.state()
        }


        fn message( &self ) -> String {
            self.ctl.status().read().unwrap().message.clone().map( |m| m.text ).unwrap_or_default()
        }
    }


    #[test]
    fn test_normal_completion_advances_then_idles() {
        let mut rig = Rig::new( &[ "A", "B", "C" ] );
        rig.send( Command::Play );
        assert_eq!( rig.state(), PlaybackState::Loading );
        rig.ready();
        assert_eq!( rig.state(), PlaybackState::Playing );

        rig.finish();
        assert_eq!( rig.starts(), vec![ "A", "B" ] );
        assert_eq!( rig.now_playing(), Some( 1 ) );

        rig.finish();
        rig.finish();
        assert_eq!( rig.starts(), vec![ "A", "B", "C" ] );
        assert_eq!( rig.state(), PlaybackState::Idle );
    }


    #[test]
    fn test_play_complete_stop_scenario() {
        let mut rig = Rig::new( &[ "A", "B", "C" ] );
        rig.send( Command::Play );
        rig.ready();
        rig.finish();
        let b = rig.live();
        assert_eq!( rig.starts(), vec![ "A", "B" ] );

        rig.ready();
        rig.send( Command::Stop );
        assert_eq!( rig.calls().last(), Some( &Call::Terminate( b ) ) );
        assert_eq!( rig.state(), PlaybackState::Idle );

        // Nothing reaches the dead handle afterwards.
        let before = rig.calls().len();
        rig.send( Command::TogglePause );
        rig.event( ProcessEvent::Exited { handle: b, status: ProcessStatus::Killed } );
        rig.send( Command::Seek( SeekTarget::Relative( 10 ) ) );
        assert_eq!( rig.calls().len(), before );
        assert_eq!( rig.state(), PlaybackState::Idle );
    }


    #[test]
    fn test_stop_while_loading() {
        let mut rig = Rig::new( &[ "A" ] );
        rig.send( Command::Play );
        let a = rig.live();
        rig.send( Command::Stop );
        assert_eq!( rig.state(), PlaybackState::Idle );

        rig.event( ProcessEvent::Ready( a ) );
        assert_eq!( rig.state(), PlaybackState::Idle );
        assert_eq!( rig.ctl.supervisor().live, None );
    }


    #[test]
    fn test_repeat_all_wraps() {
        let mut rig = Rig::new( &[ "A", "B" ] );
        rig.send( Command::Repeat( Some( Repeat::All ) ) );
        rig.send( Command::Play );
        rig.finish();
        rig.finish();
        assert_eq!( rig.starts(), vec![ "A", "B", "A" ] );
        assert_eq!( rig.now_playing(), Some( 0 ) );
    }


    #[test]
    fn test_repeat_all_single_entry_restarts_after_terminate() {
        let mut rig = Rig::new( &[ "A" ] );
        rig.send( Command::Repeat( Some( Repeat::All ) ) );
        rig.send( Command::Play );
        for _ in 0..3 {
            rig.finish();
        }

        let calls = rig.calls();
        let restarts: Vec<usize> = calls
            .iter()
            .enumerate()
            .skip( 1 )
            .filter( |( _, c )| matches!( c, Call::Start( .. ) ) )
            .map( |( i, _ )| i )
            .collect();
        assert_eq!( restarts.len(), 3 );
        for i in restarts {
            assert!( matches!( calls[ i - 1 ], Call::Terminate( _ ) ) );
        }
        assert_eq!( rig.starts(), vec![ "A"; 4 ] );
    }


    #[test]
    fn test_repeat_one_reselects() {
        let mut rig = Rig::new( &[ "A", "B" ] );
        rig.send( Command::Repeat( Some( Repeat::One ) ) );
        rig.send( Command::Play );
        rig.finish();
        rig.finish();
        assert_eq!( rig.starts(), vec![ "A", "A", "A" ] );
    }


    #[test]
    fn test_shuffle_plays_each_once() {
        let names = [ "A", "B", "C", "D", "E" ];
        let mut rig = Rig::new( &names );
        rig.send( Command::Shuffle( Some( true ) ) );
        rig.send( Command::Play );
        for _ in 0..4 {
            rig.finish();
        }

        let starts = rig.starts();
        let distinct: HashSet<&String> = starts.iter().collect();
        assert_eq!( starts.len(), 5 );
        assert_eq!( distinct.len(), 5 );

        rig.finish();
        assert_eq!( rig.state(), PlaybackState::Idle );
        assert_eq!( rig.starts().len(), 5 );

        // Stored order is untouched.
        let store = rig.store.read().unwrap();
        let order: Vec<&str> = store.playlist.list().iter().map( |e| e.file_name() ).collect();
        assert_eq!( order, names );
    }


    #[test]
    fn test_removing_playing_entry_moves_to_follower() {
        let mut rig = Rig::new( &[ "A", "B", "C" ] );
        rig.send( Command::Play );
        rig.ready();
        let a = rig.live();

        rig.send( Command::Remove );
        assert_eq!( rig.starts(), vec![ "A", "B" ] );
        assert_eq!( rig.now_playing(), Some( 0 ) );
        assert!( rig.calls().contains( &Call::Terminate( a ) ) );
        assert_eq!( rig.state(), PlaybackState::Loading );
    }


    #[test]
    fn test_removing_last_playing_entry_idles() {
        let mut rig = Rig::new( &[ "A", "B" ] );
        rig.send( Command::Cursor { list: ListId::Playlist, motion: Motion::End } );
        rig.send( Command::PlaySelected { list: ListId::Playlist } );
        rig.ready();

        rig.send( Command::Remove );
        assert_eq!( rig.starts(), vec![ "B" ] );
        assert_eq!( rig.now_playing(), None );
        assert_eq!( rig.state(), PlaybackState::Idle );
    }


    #[test]
    fn test_removing_other_entry_keeps_playing() {
        let mut rig = Rig::new( &[ "A", "B", "C" ] );
        rig.send( Command::Cursor { list: ListId::Playlist, motion: Motion::End } );
        rig.send( Command::PlaySelected { list: ListId::Playlist } );
        rig.ready();
        rig.send( Command::Cursor { list: ListId::Playlist, motion: Motion::Home } );

        rig.send( Command::Remove );
        assert_eq!( rig.starts(), vec![ "C" ] );
        assert_eq!( rig.now_playing(), Some( 1 ) );
        assert_eq!( rig.state(), PlaybackState::Playing );
    }


    #[test]
    fn test_empty_playlist() {
        let mut rig = Rig::new( &[] );
        rig.send( Command::Play );
        assert_eq!( rig.state(), PlaybackState::Idle );
        assert_eq!( rig.message(), ControlError::EmptyPlaylist.to_string() );
        rig.send( Command::Next );
        assert!( rig.calls().is_empty() );
    }


    #[test]
    fn test_spawn_failure_advances() {
        let mut fake = FakeSupervisor::default();
        fake.failing.insert( "/m/B".into() );
        let mut rig = Rig::with( &[ "A", "B", "C" ], fake );

        rig.send( Command::Play );
        rig.finish();
        assert_eq!( rig.starts(), vec![ "A", "B", "C" ] );
        assert_eq!( rig.now_playing(), Some( 2 ) );
        assert_eq!( rig.state(), PlaybackState::Loading );
    }


    #[test]
    fn test_spawn_failures_stop_once_all_failed() {
        let mut fake = FakeSupervisor::default();
        fake.failing.insert( "/m/A".into() );
        fake.failing.insert( "/m/B".into() );
        let mut rig = Rig::with( &[ "A", "B" ], fake );
        rig.send( Command::Repeat( Some( Repeat::All ) ) );

        rig.send( Command::Play );
        assert_eq!( rig.starts(), vec![ "A", "B" ] );
        assert_eq!( rig.state(), PlaybackState::Idle );
        assert_eq!( rig.message(), ControlError::NothingPlayable.to_string() );
    }


    #[test]
    fn test_crash_is_reported_and_advances() {
        let mut rig = Rig::new( &[ "A", "B" ] );
        rig.send( Command::Play );
        rig.ready();
        let a = rig.live();
        rig.event( ProcessEvent::Exited { handle: a, status: ProcessStatus::ExitedError( 139 ) } );
        assert_eq!( rig.starts(), vec![ "A", "B" ] );
        assert_eq!( rig.state(), PlaybackState::Loading );
        assert_eq!( rig.now_playing(), Some( 1 ) );
        assert!( rig.message().contains( "code 139" ) );
    }


    #[test]
    fn test_crash_of_last_entry_is_reported() {
        let mut rig = Rig::new( &[ "A" ] );
        rig.send( Command::Play );
        rig.ready();
        let a = rig.live();
        rig.event( ProcessEvent::Exited { handle: a, status: ProcessStatus::ExitedError( 2 ) } );
        assert_eq!( rig.state(), PlaybackState::Idle );
        assert!( rig.message().contains( "code 2" ) );
    }


    #[test]
    fn test_stale_exit_is_ignored() {
        let mut rig = Rig::new( &[ "A", "B", "C" ] );
        rig.send( Command::Play );
        rig.ready();
        let a = rig.live();
        rig.send( Command::Next );
        assert_eq!( rig.starts(), vec![ "A", "B" ] );

        rig.event( ProcessEvent::Exited { handle: a, status: ProcessStatus::Killed } );
        assert_eq!( rig.starts(), vec![ "A", "B" ] );
        assert_eq!( rig.state(), PlaybackState::Loading );
        assert_eq!( rig.now_playing(), Some( 1 ) );
    }


    #[test]
    fn test_prev_and_end_of_list() {
        let mut rig = Rig::new( &[ "A", "B" ] );
        rig.send( Command::Cursor { list: ListId::Playlist, motion: Motion::End } );
        rig.send( Command::PlaySelected { list: ListId::Playlist } );
        rig.send( Command::Prev );
        assert_eq!( rig.starts(), vec![ "B", "A" ] );

        rig.send( Command::Prev );
        assert_eq!( rig.state(), PlaybackState::Idle );
        assert_eq!( rig.starts(), vec![ "B", "A" ] );
    }


    #[test]
    fn test_pause_and_resume() {
        let mut rig = Rig::new( &[ "A" ] );
        rig.send( Command::Play );
        rig.ready();
        let a = rig.live();

        rig.send( Command::TogglePause );
        assert_eq!( rig.state(), PlaybackState::Paused );
        rig.send( Command::Play );
        assert_eq!( rig.state(), PlaybackState::Playing );
        rig.send( Command::Resume );
        rig.send( Command::TogglePause );
        rig.send( Command::TogglePause );

        let sent: Vec<&Call> = rig.calls().iter().filter( |c| matches!( c, Call::Send( .. ) ) ).collect();
        assert_eq!( sent, vec![
            &Call::Send( a, Control::Pause ),
            &Call::Send( a, Control::Resume ),
            &Call::Send( a, Control::Pause ),
            &Call::Send( a, Control::Resume ),
        ]);
    }


    #[test]
    fn test_volume_is_clamped_everywhere() {
        let mut rig = Rig::new( &[ "A" ] );
        rig.send( Command::Play );
        rig.ready();
        let a = rig.live();

        rig.send( Command::parse( "volume 200" ).unwrap() );
        assert_eq!( rig.calls().last(), Some( &Call::Send( a, Control::SetVolume( 100 ) ) ) );
        rig.send( Command::Volume( VolumeChange::Step( 50 ) ) );
        assert_eq!( rig.calls().last(), Some( &Call::Send( a, Control::SetVolume( 100 ) ) ) );
        rig.send( Command::Volume( VolumeChange::Step( -150 ) ) );
        assert_eq!( rig.calls().last(), Some( &Call::Send( a, Control::SetVolume( 0 ) ) ) );
        assert_eq!( rig.ctl.status().read().unwrap().volume, 0 );
    }


    #[test]
    fn test_volume_reapplied_when_ready() {
        let mut rig = Rig::new( &[ "A" ] );
        rig.send( Command::Volume( VolumeChange::Set( 30 ) ) );
        rig.send( Command::Play );
        rig.ready();
        let a = rig.live();
        assert_eq!( rig.calls().last(), Some( &Call::Send( a, Control::SetVolume( 30 ) ) ) );
    }


    #[test]
    fn test_volume_unsupported() {
        let fake = FakeSupervisor { no_volume: true, ..FakeSupervisor::default() };
        let mut rig = Rig::with( &[ "A" ], fake );
        rig.send( Command::Play );
        rig.ready();
        rig.send( Command::Volume( VolumeChange::Set( 30 ) ) );
        assert_eq!( rig.message(), ControlError::VolumeUnsupported.to_string() );
    }


    #[test]
    fn test_seek_in_band() {
        let mut rig = Rig::new( &[ "A" ] );
        rig.send( Command::Play );
        rig.ready();
        let a = rig.live();
        rig.event( ProcessEvent::Progress { handle: a, position: Duration::from_secs( 20 ), length: Some( Duration::from_secs( 60 ) ) } );

        rig.send( Command::Seek( SeekTarget::Relative( 10 ) ) );
        assert_eq!( rig.calls().last(), Some( &Call::Send( a, Control::Seek( SeekTarget::Relative( 10 ) ) ) ) );
        let status = rig.ctl.status().read().unwrap().clone();
        assert!( status.clock.position() >= Duration::from_secs( 30 ) );
        assert_eq!( status.length, Some( Duration::from_secs( 60 ) ) );
    }


    #[test]
    fn test_seek_by_restart() {
        let fake = FakeSupervisor { restart: true, ..FakeSupervisor::default() };
        let mut rig = Rig::with( &[ "A", "B" ], fake );
        rig.send( Command::Play );
        rig.ready();
        let a = rig.live();

        rig.send( Command::Seek( SeekTarget::Absolute( Duration::from_secs( 30 ) ) ) );
        let calls = rig.calls();
        assert_eq!( calls[ calls.len() - 2 ], Call::Terminate( a ) );
        assert_eq!( calls[ calls.len() - 1 ], Call::Start( "/m/A".into(), Duration::from_secs( 30 ) ) );
        assert_eq!( rig.now_playing(), Some( 0 ) );
    }


    #[test]
    fn test_filelist_entry_completion_idles() {
        let mut rig = Rig::new( &[ "A", "B" ] );
        let song = rig.dir.path().join( "song.mp3" );
        std::fs::write( &song, b"" ).unwrap();
        rig.send( Command::Goto { path: rig.dir.path().to_string_lossy().into_owned() } );
        rig.send( Command::Cursor { list: ListId::Filelist, motion: Motion::End } );

        rig.send( Command::PlaySelected { list: ListId::Filelist } );
        assert_eq!( rig.starts(), vec![ song.to_string_lossy().into_owned() ] );
        assert_eq!( rig.now_playing(), None );

        rig.finish();
        assert_eq!( rig.state(), PlaybackState::Idle );
        assert_eq!( rig.starts().len(), 1 );
    }


    #[test]
    fn test_stop_after_track() {
        let mut rig = Rig::new( &[ "A", "B" ] );
        rig.send( Command::StopAfter );
        rig.send( Command::Play );
        rig.finish();
        assert_eq!( rig.starts(), vec![ "A" ] );
        assert_eq!( rig.state(), PlaybackState::Idle );
    }


    #[test]
    fn test_load_keeps_current_playing() {
        let mut rig = Rig::new( &[ "A" ] );
        let list = rig.dir.path().join( "mix.m3u" );
        std::fs::write( &list, "http://radio.example/one\nhttp://radio.example/two\n" ).unwrap();

        rig.send( Command::Play );
        rig.ready();
        rig.send( Command::Load { path: list.to_string_lossy().into_owned() } );
        assert_eq!( rig.state(), PlaybackState::Playing );
        assert_eq!( rig.store.read().unwrap().playlist.len(), 2 );
        assert_eq!( rig.now_playing(), None );

        rig.finish();
        assert_eq!( rig.state(), PlaybackState::Idle );
        assert_eq!( rig.starts(), vec![ "A" ] );
    }


    #[test]
    fn test_move_and_jump() {
        let mut rig = Rig::new( &[ "A", "B", "C" ] );
        rig.send( Command::Play );
        rig.send( Command::MoveSelected { delta: 5 } );
        assert_eq!( rig.now_playing(), Some( 2 ) );

        rig.send( Command::Cursor { list: ListId::Playlist, motion: Motion::Home } );
        rig.send( Command::JumpToActive );
        assert_eq!( rig.store.read().unwrap().playlist.cursor(), Some( 2 ) );
    }


    #[test]
    fn test_removing_playing_entry_while_paused_plays_follower() {
        let mut rig = Rig::new( &[ "A", "B", "C" ] );
        rig.send( Command::Play );
        rig.ready();
        rig.send( Command::TogglePause );
        assert_eq!( rig.state(), PlaybackState::Paused );

        rig.send( Command::Remove );
        assert_eq!( rig.starts(), vec![ "A", "B" ] );
        assert_eq!( rig.now_playing(), Some( 0 ) );
        assert_eq!( rig.state(), PlaybackState::Loading );
    }


    #[test]
    fn test_shuffle_repeat_all_never_idles_or_repeats() {
        let mut rig = Rig::new( &[ "A", "B", "C", "D" ] );
        rig.send( Command::Repeat( Some( Repeat::All ) ) );
        rig.send( Command::Shuffle( Some( true ) ) );
        rig.send( Command::Play );

        for _ in 0..20 {
            let before = rig.now_playing();
            rig.finish();
            assert_eq!( rig.state(), PlaybackState::Loading );
            assert_ne!( rig.now_playing(), before );
        }
        assert_eq!( rig.starts().len(), 21 );
    }


    #[test]
    fn test_load_tolerates_odd_playlist_keys() {
        let mut rig = Rig::new( &[ "A" ] );
        let list = rig.dir.path().join( "mix.pls" );
        std::fs::write( &list, "[playlist]\nFileé=x\nFil€1=y\nFile1=http://radio.example/one\nNumberOfEntries=1\n" ).unwrap();

        rig.send( Command::Load { path: list.to_string_lossy().into_owned() } );
        assert_eq!( rig.message(), "Loaded 1 entries" );
        let store = rig.store.read().unwrap();
        assert_eq!( store.playlist.get( 0 ).unwrap().locator(), "http://radio.example/one" );
    }


    #[test]
    fn test_load_of_unreadable_playlist_keeps_entries() {
        let mut rig = Rig::new( &[ "A" ] );
        let list = rig.dir.path().join( "broken.pls" );
        std::fs::write( &list, b"[playlist]\nFile1=\xff.mp3\n" ).unwrap();

        rig.send( Command::Load { path: list.to_string_lossy().into_owned() } );
        assert!( rig.ctl.status().read().unwrap().message.as_ref().is_some_and( |m| m.error ) );
        assert_eq!( rig.store.read().unwrap().playlist.len(), 1 );
    }


    #[test]
    fn test_removing_marked_entries_moves_past_them() {
        let mut rig = Rig::new( &[ "A", "B", "C", "D" ] );
        rig.send( Command::Cursor { list: ListId::Playlist, motion: Motion::Down } );
        rig.send( Command::PlaySelected { list: ListId::Playlist } );
        rig.ready();

        rig.send( Command::Cursor { list: ListId::Playlist, motion: Motion::Home } );
        rig.send( Command::SetMark { list: ListId::Playlist, marked: true } );
        rig.send( Command::SetMark { list: ListId::Playlist, marked: true } );
        rig.send( Command::Remove );

        assert_eq!( rig.starts(), vec![ "B", "C" ] );
        assert_eq!( rig.now_playing(), Some( 0 ) );
        let store = rig.store.read().unwrap();
        let order: Vec<&str> = store.playlist.list().iter().map( |e| e.file_name() ).collect();
        assert_eq!( order, vec![ "C", "D" ] );
    }


    #[test]
    fn test_move_marked_after_cursor() {
        let mut rig = Rig::new( &[ "A", "B", "C", "D" ] );
        rig.send( Command::ToggleMark { list: ListId::Playlist } );
        rig.send( Command::Cursor { list: ListId::Playlist, motion: Motion::End } );
        rig.send( Command::MoveSelected { delta: 1 } );

        let store = rig.store.read().unwrap();
        let order: Vec<&str> = store.playlist.list().iter().map( |e| e.file_name() ).collect();
        assert_eq!( order, vec![ "B", "C", "D", "A" ] );
        assert_eq!( store.playlist.cursor(), Some( 3 ) );
    }


    #[test]
    fn test_add_marked_filelist_entries() {
        let mut rig = Rig::new( &[] );
        for name in [ "one.mp3", "three.mp3", "two.mp3" ] {
            std::fs::write( rig.dir.path().join( name ), b"" ).unwrap();
        }
        rig.send( Command::Goto { path: rig.dir.path().to_string_lossy().into_owned() } );

        // The parent link and three.mp3.
        rig.send( Command::ToggleMark { list: ListId::Filelist } );
        rig.send( Command::Cursor { list: ListId::Filelist, motion: Motion::Down } );
        rig.send( Command::ToggleMark { list: ListId::Filelist } );
        rig.send( Command::AddSelected );
        assert_eq!( rig.message(), "Added 1 entries" );
        {
            let store = rig.store.read().unwrap();
            assert_eq!( store.playlist.get( 0 ).unwrap().file_name(), "three.mp3" );
            assert!( !store.filelist.has_marks() );
        }

        rig.send( Command::AddSelected );
        let store = rig.store.read().unwrap();
        assert_eq!( store.playlist.get( 1 ).unwrap().file_name(), "two.mp3" );
    }


    #[test]
    fn test_mark_by_pattern() {
        let mut rig = Rig::new( &[ "Blues A", "rock", "blues B" ] );
        rig.send( Command::parse( "mark blues" ).unwrap() );
        assert_eq!( rig.message(), "Marked 2 entries" );

        rig.send( Command::parse( "mark (" ).unwrap() );
        assert!( rig.ctl.status().read().unwrap().message.as_ref().is_some_and( |m| m.error ) );

        rig.send( Command::InvertMarks { list: ListId::Playlist } );
        assert_eq!( rig.store.read().unwrap().playlist.marked(), vec![ 1 ] );
    }


    #[test]
    fn test_find_recursive_and_back() {
        let mut rig = Rig::new( &[] );
        let sub = rig.dir.path().join( "sub" );
        std::fs::create_dir( &sub ).unwrap();
        std::fs::write( sub.join( "Blues.mp3" ), b"" ).unwrap();
        std::fs::write( sub.join( "rock.mp3" ), b"" ).unwrap();

        rig.send( Command::FindRecursive { pattern: "nothing".into() } );
        assert_eq!( rig.message(), "Not found: nothing" );

        rig.send( Command::FindRecursive { pattern: "blues".into() } );
        {
            let store = rig.store.read().unwrap();
            assert!( store.is_search_results() );
            let found: Vec<&str> = store.filelist.list().iter().map( |e| e.file_name() ).collect();
            assert_eq!( found, vec![ "Blues.mp3" ] );
        }

        rig.send( Command::Parent );
        assert!( !rig.store.read().unwrap().is_search_results() );
    }


    #[test]
    fn test_bookmarks() {
        let mut rig = Rig::new( &[] );
        std::fs::create_dir( rig.dir.path().join( "sub" ) ).unwrap();
        rig.send( Command::SetBookmark( 'h' ) );
        rig.send( Command::Goto { path: "sub".into() } );
        rig.send( Command::GotoBookmark( 'h' ) );
        assert_eq!( rig.store.read().unwrap().cwd(), rig.dir.path() );

        rig.send( Command::GotoBookmark( 'q' ) );
        assert_eq!( rig.message(), StoreError::NoBookmark( 'q' ).to_string() );
    }


    /// Notes whether the store was locked while tags were being read.
    struct LockCheckingTags {
        store: Arc<RwLock<EntryStore>>,
        blocked: AtomicBool,
    }


    impl TagReader for LockCheckingTags {
        fn fetch( &self, locator: &str ) -> Option<Tags> {
            if self.store.try_write().is_err() {
                self.blocked.store( true, Ordering::SeqCst );
            }
            let name = locator.trim_start_matches( "/m/" ).to_lowercase();
            Some( Tags { title: Some( format!( "tagged {}", name ) ), ..Tags::default() } )
        }
    }


    fn tagged( names: &[&str] ) -> ( Controller<FakeSupervisor>, Arc<LockCheckingTags>, tempfile::TempDir ) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EntryStore::new( dir.path().to_path_buf() );
        for name in names {
            store.playlist.push( Entry::with_kind( format!( "/m/{}", name ), EntryKind::LocalFile ) );
        }
        let store = Arc::new( RwLock::new( store ) );
        let tags = Arc::new( LockCheckingTags { store: Arc::clone( &store ), blocked: AtomicBool::new( false ) } );
        let ctl = Controller::new( FakeSupervisor::default(), store, tags.clone() );
        ( ctl, tags, dir )
    }


    fn apply( ctl: &mut Controller<FakeSupervisor>, command: Command ) {
        ctl.handle( Envelope { seq: 0, source: Source::Keyboard, event: Event::Command( command ) } );
    }


    #[test]
    fn test_search_reads_tags_without_the_store_lock() {
        let ( mut ctl, tags, _dir ) = tagged( &[ "C", "A", "B" ] );
        apply( &mut ctl, Command::Search { list: ListId::Playlist, term: "tagged b".into(), forward: true } );
        assert!( !tags.blocked.load( Ordering::SeqCst ) );
        assert_eq!( read_lock( &tags.store ).playlist.cursor(), Some( 2 ) );
    }


    #[test]
    fn test_sort_reads_tags_without_the_store_lock() {
        let ( mut ctl, tags, _dir ) = tagged( &[ "C", "A", "B" ] );
        apply( &mut ctl, Command::Sort );
        assert!( !tags.blocked.load( Ordering::SeqCst ) );

        let store = read_lock( &tags.store );
        let order: Vec<&str> = store.playlist.list().iter().map( |e| e.file_name() ).collect();
        assert_eq!( order, vec![ "A", "B", "C" ] );
    }


    #[test]
    fn test_quit_stops_and_publishes_shutdown() {
        let mut rig = Rig::new( &[ "A" ] );
        rig.send( Command::Play );
        let a = rig.live();
        assert_eq!( rig.send( Command::Quit ), Flow::Quit );
        assert_eq!( rig.calls().last(), Some( &Call::Terminate( a ) ) );
        assert!( rig.ctl.status().read().unwrap().shutdown );
    }


    #[test]
    fn test_status_snapshot() {
        let mut rig = Rig::new( &[ "A" ] );
        rig.send( Command::Shuffle( None ) );
        rig.send( Command::Play );
        let status = rig.ctl.status().read().unwrap().clone();
        assert_eq!( status.state, PlaybackState::Loading );
        assert!( status.mode.shuffle );
        assert_eq!( status.now_playing.map( |e| e.locator().to_string() ), Some( "/m/A".to_string() ) );
    }
}
