//! mcplay CLI - terminal playlist manager driving an external player

mod cli;
mod input;
mod keys;
mod settings;
mod ui;
mod view;

use std::fs::{ self, File };
use std::io::{ self, BufRead, IsTerminal };
use std::path::Path;
use std::sync::{ Arc, Mutex, RwLock };
use std::thread;
use std::time::{ Duration, Instant };

use anyhow::{ Context, Result };
use clap::Parser;
use crossterm::{
    event::{ self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers },
    terminal::{ disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen },
    ExecutableCommand,
};
use ratatui::prelude::*;
use tracing_subscriber::EnvFilter;

use cli::Args;
use input::{ InputBuffer, InputMode };
use keys::Action;
use settings::{ PlayerChoice, Settings };
use view::{ Counter, Listing, ViewMode };

use mcplay_core::{
    filelist, read_lock, remote, Command, Controller, Dispatcher, EntryStore, Inbox, ListId,
    NoTags, PlaybackMode, Repeat, RemoteListener, Source, Status, Supervisor, SymphoniaTags, TagReader,
};


/// Application name, used for the socket and the data directories.
const APP: &str = "mcplay";

/// How long a status message stays on screen.
const MESSAGE_TIMEOUT: Duration = Duration::from_secs( 3 );

/// How often the filelist checks its directory for changes.
const REFRESH_INTERVAL: Duration = Duration::from_secs( 1 );


/// Front-end state. Playback state lives in the controller thread; this
/// only holds what the terminal needs.
struct App {
    inbox: Inbox,
    store: Arc<RwLock<EntryStore>>,
    status: Arc<RwLock<Status>>,
    tags: Arc<dyn TagReader>,
    should_quit: bool,

    // View state
    view: ViewMode,
    return_view: ViewMode,
    listing: Listing,
    counter: Counter,
    filelist_offset: usize,
    playlist_offset: usize,
    page: usize,
    help_scroll: u16,
    redraw: bool,

    // Input state
    input_mode: InputMode,
    input_buffer: InputBuffer,
    last_search: Option<String>,

    // Status message (shown in status bar), flagged when it is an error
    status_message: Option<( String, bool )>,
    status_clear_at: Option<Instant>,
    last_message_seq: Option<u64>,

    last_refresh: Instant,
}


impl App {
    fn new( inbox: Inbox, store: Arc<RwLock<EntryStore>>, status: Arc<RwLock<Status>>, tags: Arc<dyn TagReader> ) -> Self {
        let view = if read_lock( &store ).playlist.is_empty() {
            ViewMode::Filelist
        } else {
            ViewMode::Playlist
        };

        Self {
            inbox,
            store,
            status,
            tags,
            should_quit: false,
            view,
            return_view: view,
            listing: Listing::default(),
            counter: Counter::default(),
            filelist_offset: 0,
            playlist_offset: 0,
            page: 10,
            help_scroll: 0,
            redraw: false,
            input_mode: InputMode::Normal,
            input_buffer: InputBuffer::new(),
            last_search: None,
            status_message: None,
            status_clear_at: None,
            last_message_seq: None,
            last_refresh: Instant::now(),
        }
    }


    /// Sets a status message that auto-clears after a delay.
    fn set_status( &mut self, msg: impl Into<String>, error: bool ) {
        self.status_message = Some(( msg.into(), error ));
        self.status_clear_at = Some( Instant::now() + MESSAGE_TIMEOUT );
    }


    /// Queues a command for the controller.
    fn send( &mut self, command: Command ) {
        if !self.inbox.command( command ) {
            tracing::error!( "Controller is gone, exiting" );
            self.should_quit = true;
        }
    }


    /// Picks up controller messages, expires old ones and polls the
    /// filelist directory.
    ///
    /// @returns true once the controller has shut down
    fn tick( &mut self ) -> bool {
        let ( message, shutdown ) = {
            let status = read_lock( &self.status );
            ( status.message.clone(), status.shutdown )
        };

        if let Some( message ) = message {
            if self.last_message_seq != Some( message.seq ) {
                self.last_message_seq = Some( message.seq );
                self.set_status( message.text, message.error );
            }
        }

        if let Some( clear_at ) = self.status_clear_at {
            if Instant::now() >= clear_at {
                self.status_message = None;
                self.status_clear_at = None;
            }
        }

        if self.view == ViewMode::Filelist && self.last_refresh.elapsed() >= REFRESH_INTERVAL {
            self.last_refresh = Instant::now();
            self.send( Command::Refresh );
        }

        shutdown || self.should_quit
    }


    fn handle_key( &mut self, key: KeyEvent ) {
        if self.input_mode != InputMode::Normal {
            self.handle_prompt_key( key );
            return;
        }

        if self.view == ViewMode::Help {
            match key.code {
                KeyCode::Char( 'j' ) | KeyCode::Down => {
                    self.help_scroll = self.help_scroll.saturating_add( 1 );
                    return;
                }
                KeyCode::Char( 'k' ) | KeyCode::Up => {
                    self.help_scroll = self.help_scroll.saturating_sub( 1 );
                    return;
                }
                _ => {}
            }
        }

        if let Some( action ) = keys::map_key( self.view, key, self.page ) {
            self.apply( action );
        }
    }


    fn apply( &mut self, action: Action ) {
        match action {
            Action::Engine( command ) => self.send( command ),
            Action::SwitchView => self.view = self.view.next_tab(),
            Action::ToggleHelp => {
                if self.view == ViewMode::Help {
                    self.view = self.return_view;
                } else {
                    self.return_view = self.view;
                    self.view = ViewMode::Help;
                    self.help_scroll = 0;
                }
            }
            Action::Prompt( mode ) => {
                self.input_mode = mode;
                self.input_buffer.clear();
            }
            Action::CycleListing => {
                self.listing = self.listing.next();
                self.set_status( format!( "Listing: {}", self.listing.name() ), false );
            }
            Action::ToggleCounter => self.counter = self.counter.toggle(),
            Action::Redraw => self.redraw = true,
        }
    }


    fn handle_prompt_key( &mut self, key: KeyEvent ) {
        let ctrl = key.modifiers.contains( KeyModifiers::CONTROL );

        // Bookmarks are named by a single key.
        if let ( InputMode::Bookmark { set }, KeyCode::Char( c ), false ) = ( self.input_mode, key.code, ctrl ) {
            self.input_mode = InputMode::Normal;
            self.send( if set { Command::SetBookmark( c ) } else { Command::GotoBookmark( c ) } );
            return;
        }

        match key.code {
            KeyCode::Enter => {
                let mode = self.input_mode;
                let text = self.input_buffer.take();
                self.input_mode = InputMode::Normal;
                self.submit( mode, text.trim() );
            }
            KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
                self.input_buffer.clear();
            }
            KeyCode::Char( 'g' | 'c' ) if ctrl => {
                self.input_mode = InputMode::Normal;
                self.input_buffer.clear();
            }
            KeyCode::Char( 'u' ) if ctrl => self.input_buffer.clear(),
            KeyCode::Char( 'w' ) if ctrl => self.input_buffer.delete_word(),
            KeyCode::Backspace => {
                if self.input_buffer.is_empty() {
                    self.input_mode = InputMode::Normal;
                } else {
                    self.input_buffer.backspace();
                }
            }
            KeyCode::Delete => self.input_buffer.delete(),
            KeyCode::Left => self.input_buffer.move_left(),
            KeyCode::Right => self.input_buffer.move_right(),
            KeyCode::Home => self.input_buffer.move_home(),
            KeyCode::End => self.input_buffer.move_end(),
            KeyCode::Char( c ) if !ctrl => self.input_buffer.insert( c ),
            _ => {}
        }
    }


    fn submit( &mut self, mode: InputMode, text: &str ) {
        match mode {
            InputMode::Normal => {}
            InputMode::Command => {
                if text.is_empty() {
                    return;
                }
                match Command::parse( text ) {
                    Ok( command ) => self.send( command ),
                    Err( e ) => self.set_status( e.to_string(), true ),
                }
            }
            InputMode::Search { forward } => {
                let Some( list ) = self.list() else { return };
                // An empty search repeats the previous one.
                let term = if text.is_empty() {
                    match &self.last_search {
                        Some( term ) => term.clone(),
                        None => return,
                    }
                } else {
                    text.to_string()
                };
                self.last_search = Some( term.clone() );
                self.send( Command::Search { list, term, forward } );
            }
            InputMode::Goto => {
                if !text.is_empty() {
                    self.send( Command::Goto { path: text.to_string() } );
                }
            }
            InputMode::Save => {
                if !text.is_empty() {
                    self.send( Command::Save { path: text.to_string() } );
                }
            }
            InputMode::Find => {
                if !text.is_empty() {
                    self.send( Command::FindRecursive { pattern: text.to_string() } );
                }
            }
            InputMode::MarkPattern { marked } => {
                let Some( list ) = self.list() else { return };
                if !text.is_empty() {
                    self.send( Command::MarkMatching { list, pattern: text.to_string(), marked } );
                }
            }
            InputMode::Bookmark { .. } => {}
        }
    }


    /// List shown by the current view.
    fn list( &self ) -> Option<ListId> {
        match self.view {
            ViewMode::Filelist => Some( ListId::Filelist ),
            ViewMode::Playlist => Some( ListId::Playlist ),
            ViewMode::Help => None,
        }
    }
}


/// Installs the tracing subscriber, writing to a log file since the
/// terminal belongs to the UI.
fn init_logging() {
    let Some( dir ) = dirs::data_local_dir().map( |d| d.join( APP ) ) else {
        return;
    };
    if fs::create_dir_all( &dir ).is_err() {
        return;
    }
    let file = match File::create( dir.join( "mcplay.log" ) ) {
        Ok( f ) => f,
        Err( _ ) => return,
    };

    let filter = EnvFilter::try_from_env( "MCPLAY_LOG" ).unwrap_or_else( |_| EnvFilter::new( "info" ) );
    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_writer( Mutex::new( file ) )
        .with_ansi( false )
        .init();
}


/// Playlist seed: command-line paths, otherwise lines piped on stdin.
fn initial_locators( args: &Args ) -> Result<Vec<String>> {
    if !args.paths.is_empty() {
        return Ok( args.paths.clone() );
    }

    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok( Vec::new() );
    }
    let mut locators = Vec::new();
    for line in stdin.lock().lines() {
        let line = line.context( "Failed to read playlist from stdin" )?;
        let line = line.trim();
        if !line.is_empty() {
            locators.push( line.to_string() );
        }
    }
    Ok( locators )
}


/// Expands each locator onto the playlist, making existing paths absolute.
fn seed_playlist( store: &mut EntryStore, locators: &[String] ) {
    let cwd = store.cwd().to_path_buf();
    for locator in locators {
        let path = Path::new( locator );
        let locator = if path.exists() && path.is_relative() {
            cwd.join( path ).to_string_lossy().into_owned()
        } else {
            locator.clone()
        };
        match filelist::expand( &locator ) {
            Ok( found ) => {
                store.playlist.append_locators( found );
            }
            Err( e ) => tracing::warn!( "Skipping {}: {}", locator, e ),
        }
    }
}


fn run( terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App ) -> Result<()> {
    loop {
        if app.tick() {
            return Ok(());
        }

        if app.redraw {
            terminal.clear()?;
            app.redraw = false;
        }
        terminal.draw( |frame| ui::draw( frame, app ) )?;

        if event::poll( Duration::from_millis( 100 ) )? {
            if let Event::Key( key ) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key( key );
                }
            }
        }
    }
}


fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let settings = Settings::load();
    Settings::ensure_saved();

    let control_dir = args.control_dir.clone()
        .or_else( || settings.control_dir.clone() )
        .unwrap_or_else( remote::default_control_dir );
    let socket = remote::socket_path( &control_dir, APP, &remote::current_user() );

    if let Some( line ) = &args.send {
        Command::parse( line )?;
        remote::send_line( &socket, line )?;
        return Ok(());
    }

    let choice = match &args.player {
        Some( player ) => PlayerChoice::from_arg( player )?,
        None => settings.player.clone(),
    };
    let driver = choice.driver()?;
    tracing::info!( "Player driver: {}", driver.name() );

    let locators = initial_locators( &args )?;
    let mut store = EntryStore::new( std::env::current_dir().context( "No current directory" )? );
    if args.restricted {
        store.restrict_to_cwd();
    }
    seed_playlist( &mut store, &locators );
    let store = Arc::new( RwLock::new( store ) );

    let tags: Arc<dyn TagReader> = if settings.read_tags {
        Arc::new( SymphoniaTags )
    } else {
        Arc::new( NoTags )
    };

    let mode = PlaybackMode {
        repeat: if args.repeat { Repeat::All } else { settings.repeat.into() },
        shuffle: args.shuffle || settings.shuffle,
        stop_after: false,
    };

    let dispatcher = Dispatcher::new();
    let keyboard = dispatcher.inbox( Source::Keyboard );
    let supervisor = Supervisor::new( driver, dispatcher.inbox( Source::Subprocess ), settings.grace_period() );

    let listener = match RemoteListener::bind( &socket, dispatcher.inbox( Source::Remote ) ) {
        Ok( listener ) => Some( listener ),
        Err( e ) => {
            tracing::warn!( "Remote control disabled: {}", e );
            None
        }
    };

    let mut controller = Controller::new( supervisor, Arc::clone( &store ), Arc::clone( &tags ) ).with_mode( mode );
    if let Some( volume ) = settings.volume {
        controller = controller.with_volume( volume );
    }
    let status = controller.status();
    let queue = dispatcher.into_receiver();
    let engine = thread::Builder::new()
        .name( "controller".into() )
        .spawn( move || controller.run( queue ) )?;

    let mut app = App::new( keyboard.clone(), Arc::clone( &store ), status, tags );
    if listener.is_none() {
        app.set_status( "Remote control disabled, see the log", true );
    }

    // Setup terminal
    enable_raw_mode()?;
    io::stdout().execute( EnterAlternateScreen )?;
    let mut terminal = Terminal::new( CrosstermBackend::new( io::stdout() ) )?;

    let result = run( &mut terminal, &mut app );

    // Cleanup
    disable_raw_mode()?;
    io::stdout().execute( LeaveAlternateScreen )?;
    terminal.show_cursor()?;

    keyboard.command( Command::Quit );
    drop( app );
    if engine.join().is_err() {
        tracing::error!( "Controller thread panicked" );
    }
    drop( listener );

    result
}


#[cfg( test )]
mod tests {
    use super::*;


    fn app() -> ( App, mcplay_core::Queue, tempfile::TempDir ) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new( RwLock::new( EntryStore::new( dir.path().to_path_buf() ) ) );
        let dispatcher = Dispatcher::new();
        let inbox = dispatcher.inbox( Source::Keyboard );
        let queue = dispatcher.into_receiver();
        let app = App::new( inbox, store, Arc::default(), Arc::new( NoTags ) );
        ( app, queue, dir )
    }


    fn press( app: &mut App, code: KeyCode ) {
        app.handle_key( KeyEvent::new( code, KeyModifiers::NONE ) );
    }


    fn typed( app: &mut App, text: &str ) {
        text.chars().for_each( |c| press( app, KeyCode::Char( c ) ) );
    }


    fn queued( queue: &mcplay_core::Queue ) -> Vec<Command> {
        std::iter::from_fn( || queue.try_recv() )
            .filter_map( |e| match e.event {
                mcplay_core::Event::Command( c ) => Some( c ),
                _ => None,
            })
            .collect()
    }


    #[test]
    fn test_command_prompt_sends_parsed_command() {
        let ( mut app, queue, _dir ) = app();
        typed( &mut app, ":volume 40" );
        press( &mut app, KeyCode::Enter );
        assert_eq!( app.input_mode, InputMode::Normal );
        assert_eq!( queued( &queue ), vec![ Command::parse( "volume 40" ).unwrap() ] );
    }


    #[test]
    fn test_bad_command_shows_error() {
        let ( mut app, queue, _dir ) = app();
        typed( &mut app, ":frobnicate" );
        press( &mut app, KeyCode::Enter );
        assert!( queued( &queue ).is_empty() );
        assert!( matches!( app.status_message, Some(( _, true )) ) );
    }


    #[test]
    fn test_empty_search_repeats_last() {
        let ( mut app, queue, _dir ) = app();
        app.view = ViewMode::Playlist;
        typed( &mut app, "/beat" );
        press( &mut app, KeyCode::Enter );
        typed( &mut app, "/" );
        press( &mut app, KeyCode::Enter );

        let search = Command::Search { list: ListId::Playlist, term: "beat".into(), forward: true };
        assert_eq!( queued( &queue ), vec![ search.clone(), search ] );
    }


    #[test]
    fn test_bookmark_prompt_takes_one_key() {
        let ( mut app, queue, _dir ) = app();
        press( &mut app, KeyCode::Char( 'm' ) );
        assert_eq!( app.input_mode, InputMode::Bookmark { set: true } );
        press( &mut app, KeyCode::Char( 'a' ) );
        assert_eq!( app.input_mode, InputMode::Normal );

        press( &mut app, KeyCode::Char( '\'' ) );
        press( &mut app, KeyCode::Char( '\'' ) );
        press( &mut app, KeyCode::Char( '\'' ) );
        press( &mut app, KeyCode::Esc );
        assert_eq!( app.input_mode, InputMode::Normal );
        assert_eq!( queued( &queue ), vec![ Command::SetBookmark( 'a' ), Command::GotoBookmark( '\'' ) ] );
    }


    #[test]
    fn test_find_and_mark_prompts() {
        let ( mut app, queue, _dir ) = app();
        typed( &mut app, "slive" );
        press( &mut app, KeyCode::Enter );

        app.view = ViewMode::Playlist;
        typed( &mut app, "U\\.ogg$" );
        press( &mut app, KeyCode::Enter );

        assert_eq!( queued( &queue ), vec![
            Command::FindRecursive { pattern: "live".into() },
            Command::MarkMatching { list: ListId::Playlist, pattern: "\\.ogg$".into(), marked: false },
        ]);
    }


    #[test]
    fn test_help_toggles_back() {
        let ( mut app, _queue, _dir ) = app();
        assert_eq!( app.view, ViewMode::Filelist );
        press( &mut app, KeyCode::Char( 'h' ) );
        assert_eq!( app.view, ViewMode::Help );
        press( &mut app, KeyCode::Char( 'j' ) );
        assert_eq!( app.help_scroll, 1 );
        press( &mut app, KeyCode::Char( 'q' ) );
        assert_eq!( app.view, ViewMode::Filelist );
    }


    #[test]
    fn test_controller_message_is_shown_once() {
        let ( mut app, _queue, _dir ) = app();
        app.status.write().unwrap().message = Some( mcplay_core::controller::Message {
            seq: 4,
            text: "Playing: x".into(),
            error: false,
        });
        assert!( !app.tick() );
        assert_eq!( app.status_message, Some(( "Playing: x".to_string(), false )) );

        app.status_message = None;
        app.tick();
        assert_eq!( app.status_message, None );
    }


    #[test]
    fn test_seed_playlist_makes_paths_absolute() {
        let dir = tempfile::tempdir().unwrap();
        fs::write( dir.path().join( "a.mp3" ), b"" ).unwrap();
        let mut store = EntryStore::new( dir.path().to_path_buf() );

        seed_playlist( &mut store, &[ dir.path().join( "a.mp3" ).to_string_lossy().into_owned(), "http://radio/".into(), "/no/such/file.mp3".into() ] );
        let locators: Vec<&str> = store.playlist.list().iter().map( |e| e.locator() ).collect();
        assert_eq!( locators.len(), 2 );
        assert!( locators[ 0 ].ends_with( "a.mp3" ) );
        assert_eq!( locators[ 1 ], "http://radio/" );
    }
}
