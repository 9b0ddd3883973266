//! Drawing.
//!
//! Renders the header, the filelist or playlist (or help), the now
//! playing block and the status line from the store and the published
//! controller status.

use std::sync::Arc;

use ratatui::{
    prelude::*,
    widgets::{ Block, Borders, List, ListItem, ListState, Paragraph, Wrap },
};

use mcplay_core::{ read_lock, Entry, EntryStore, ListId, PlaybackState, Repeat, Status };

use crate::input::InputMode;
use crate::keys;
use crate::view::{ format_time, ViewMode };
use crate::App;


/// Draws the main UI.
pub fn draw( frame: &mut Frame, app: &mut App ) {
    let area = frame.area();
    let status = read_lock( &app.status ).clone();

    let chunks = Layout::default()
        .direction( Direction::Vertical )
        .constraints([
            Constraint::Length( 2 ),  // Header
            Constraint::Min( 0 ),     // Main content
            Constraint::Length( 4 ),  // Now playing
            Constraint::Length( 1 ),  // Status bar
        ])
        .split( area );

    let header = Paragraph::new( format!( "  MCPLAY - {}", app.view.title() ) )
        .style( Style::default().fg( Color::Cyan ).bold() )
        .block( Block::default().borders( Borders::BOTTOM ) );
    frame.render_widget( header, chunks[0] );

    match app.view {
        ViewMode::Filelist => draw_list( frame, app, chunks[1], ListId::Filelist ),
        ViewMode::Playlist => draw_list( frame, app, chunks[1], ListId::Playlist ),
        ViewMode::Help => draw_help( frame, app, chunks[1] ),
    }

    draw_now_playing( frame, app, &status, chunks[2] );
    draw_status_bar( frame, app, chunks[3] );
}


/// A visible row, copied out of the store so that no lock is held while
/// labels read tags.
struct Row {
    index: usize,
    entry: Arc<Entry>,
    marked: bool,
}


fn draw_list( frame: &mut Frame, app: &mut App, area: Rect, id: ListId ) {
    let height = area.height.saturating_sub( 2 ) as usize;
    app.page = height.max( 1 );

    let ( rows, cursor, len, playing, location ) = {
        let store = read_lock( &app.store );
        let list = store.list( id );

        let offset = match id {
            ListId::Filelist => &mut app.filelist_offset,
            ListId::Playlist => &mut app.playlist_offset,
        };
        *offset = scroll_offset( *offset, list.cursor(), list.len(), height );

        let rows: Vec<Row> = list
            .list()
            .iter()
            .enumerate()
            .skip( *offset )
            .take( height )
            .map( |( index, entry )| Row { index, entry: Arc::clone( entry ), marked: list.is_marked( index ) } )
            .collect();
        let ( playing, location ) = match id {
            ListId::Playlist => ( list.now_playing(), None ),
            ListId::Filelist => ( None, Some( filelist_title( &store ) ) ),
        };
        ( rows, list.cursor(), list.len(), playing, location )
    };
    let offset = match id {
        ListId::Filelist => app.filelist_offset,
        ListId::Playlist => app.playlist_offset,
    };

    let items: Vec<ListItem> = rows
        .iter()
        .map( |row| {
            let label = app.listing.label( &row.entry, app.tags.as_ref() );
            let mark = if row.marked { '+' } else { ' ' };
            if Some( row.index ) == playing {
                ListItem::new( format!( "*{}{}", mark, label ) ).style( Style::default().fg( Color::Yellow ).bold() )
            } else if row.marked {
                ListItem::new( format!( " {}{}", mark, label ) ).style( Style::default().fg( Color::Cyan ) )
            } else {
                ListItem::new( format!( "  {}", label ) )
            }
        })
        .collect();

    let title = match location {
        Some( title ) => title,
        None => playlist_title( len, &read_lock( &app.status ) ),
    };

    let mut state = ListState::default();
    state.select( cursor.map( |c| c - offset ) );

    let widget = List::new( items )
        .block( Block::default()
            .title( title )
            .title_bottom( format!( " {} ", app.listing.name() ) )
            .borders( Borders::ALL )
        )
        .highlight_style( Style::default().bg( Color::DarkGray ) )
        .highlight_symbol( ">" );

    frame.render_stateful_widget( widget, area, &mut state );
}


fn filelist_title( store: &EntryStore ) -> String {
    let mut title = format!( " {}", store.cwd().display() );
    if store.is_search_results() {
        title.push_str( " [search results]" );
    }
    if store.is_restricted() {
        title.push_str( " [restricted]" );
    }
    title.push( ' ' );
    title
}


fn playlist_title( len: usize, status: &Status ) -> String {
    let mut title = format!( " Playlist ({})", len );
    if status.mode.shuffle {
        title.push_str( " [S]" );
    }
    match status.mode.repeat {
        Repeat::Off => {}
        Repeat::One => title.push_str( " [R1]" ),
        Repeat::All => title.push_str( " [R]" ),
    }
    if status.mode.stop_after {
        title.push_str( " [X]" );
    }
    title.push( ' ' );
    title
}


/// First visible row keeping `cursor` on screen with minimal scrolling.
fn scroll_offset( offset: usize, cursor: Option<usize>, len: usize, height: usize ) -> usize {
    if height == 0 || len <= height {
        return 0;
    }
    let offset = offset.min( len - height );
    match cursor {
        Some( c ) if c < offset => c,
        Some( c ) if c >= offset + height => c + 1 - height,
        _ => offset,
    }
}


fn draw_help( frame: &mut Frame, app: &mut App, area: Rect ) {
    let text = format!( "{}\n\n{}", keys::help_text(), mcplay_core::command::help_text() );
    let line_count = text.lines().count() as u16;
    let visible_height = area.height.saturating_sub( 2 );

    let max_scroll = line_count.saturating_sub( visible_height );
    if app.help_scroll > max_scroll {
        app.help_scroll = max_scroll;
    }

    let help = Paragraph::new( text )
        .block( Block::default()
            .title( " Help (j/k scroll, h or q to close) " )
            .borders( Borders::ALL )
        )
        .wrap( Wrap { trim: false } )
        .scroll(( app.help_scroll, 0 ));

    frame.render_widget( help, area );
}


fn draw_now_playing( frame: &mut Frame, app: &App, status: &Status, area: Rect ) {
    let title = status
        .now_playing
        .as_ref()
        .map( |entry| entry.title( app.tags.as_ref() ) )
        .unwrap_or_else( || "No track".to_string() );

    let position = status.clock.position();
    let counter = app.counter.format( position, status.length );
    let length = status.length.map( format_time ).unwrap_or_else( || "--:--".to_string() );

    let progress_width = 20;
    let progress = match status.length {
        Some( length ) if !length.is_zero() => ( position.as_secs_f64() / length.as_secs_f64() ).min( 1.0 ),
        _ => 0.0,
    };
    let filled = ( progress * progress_width as f64 ).round() as usize;
    let bar = format!( "[{}{}]", "=".repeat( filled ), " ".repeat( progress_width - filled ) );

    let state_style = match status.state {
        PlaybackState::Playing => Style::default().fg( Color::Green ).bold(),
        PlaybackState::Paused => Style::default().fg( Color::Yellow ).bold(),
        _ => Style::default().bold(),
    };

    let lines = vec![
        Line::from( vec![
            Span::styled( format!( " {} ", status.state ), state_style ),
            Span::raw( title ),
        ]),
        Line::from( format!( " {} {} / {}  vol {}% ", bar, counter, length, status.volume ) ),
    ];

    let now_playing = Paragraph::new( lines )
        .block( Block::default().title( " Now Playing " ).borders( Borders::ALL ) );

    frame.render_widget( now_playing, area );
}


fn draw_status_bar( frame: &mut Frame, app: &App, area: Rect ) {
    let ( text, style ) = match app.input_mode {
        InputMode::Normal => match &app.status_message {
            Some( ( msg, true ) ) => ( msg.clone(), Style::default().fg( Color::Red ) ),
            Some( ( msg, false ) ) => ( msg.clone(), Style::default().fg( Color::Green ) ),
            None => {
                let hint = match app.view {
                    ViewMode::Filelist => " [Enter]Open [a]Add [.]Up [o]Goto [Tab]Playlist [h]Help [q]Quit ",
                    ViewMode::Playlist => " [Enter]Play [z]Pause [n/p]Skip [d]Remove [Tab]Files [h]Help [q]Quit ",
                    ViewMode::Help => " [h/q/Esc]Close ",
                };
                ( hint.to_string(), Style::default().fg( Color::DarkGray ) )
            }
        },
        mode => (
            format!( "{}{}", mode.prompt(), app.input_buffer.content() ),
            Style::default().fg( Color::Yellow ),
        ),
    };

    let status = Paragraph::new( text ).style( style );
    frame.render_widget( status, area );

    if app.input_mode != InputMode::Normal {
        let cursor_x = area.x + ( app.input_mode.prompt().chars().count() + app.input_buffer.cursor_char_pos() ) as u16;
        frame.set_cursor_position(( cursor_x, area.y ));
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_scroll_offset_follows_cursor() {
        assert_eq!( scroll_offset( 0, Some( 3 ), 5, 10 ), 0 );
        assert_eq!( scroll_offset( 0, Some( 12 ), 50, 10 ), 3 );
        assert_eq!( scroll_offset( 3, Some( 5 ), 50, 10 ), 3 );
        assert_eq!( scroll_offset( 20, Some( 5 ), 50, 10 ), 5 );
        assert_eq!( scroll_offset( 45, Some( 29 ), 30, 10 ), 20 );
    }


    #[test]
    fn test_titles_show_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EntryStore::new( dir.path().to_path_buf() );
        store.show_search_results( Vec::new() );
        assert!( filelist_title( &store ).ends_with( " [search results] " ) );

        let mut status = Status::default();
        status.mode.shuffle = true;
        status.mode.repeat = Repeat::All;
        assert_eq!( playlist_title( 3, &status ), " Playlist (3) [S] [R] " );
    }
}
