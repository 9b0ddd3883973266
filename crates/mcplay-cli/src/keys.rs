//! Key bindings.
//!
//! Maps key presses in normal mode to either an engine command, queued
//! on the keyboard inbox, or an action handled by the front-end itself.

use std::time::Duration;

use crossterm::event::{ KeyCode, KeyEvent, KeyModifiers };

use mcplay_core::command::SEEK_STEP_SECS;
use mcplay_core::{ Command, ListId, Motion, SeekTarget, VolumeChange };

use crate::input::InputMode;
use crate::view::ViewMode;


/// Volume step for `+` and `-`.
const VOLUME_STEP: i16 = 5;


/// Result of a key press.
#[derive( Debug, Clone, PartialEq )]
pub enum Action {
    Engine( Command ),
    SwitchView,
    ToggleHelp,
    Prompt( InputMode ),
    CycleListing,
    ToggleCounter,
    Redraw,
}


/// Maps a key in normal mode.
///
/// @param page - Visible list height, for page motions
pub fn map_key( view: ViewMode, key: KeyEvent, page: usize ) -> Option<Action> {
    if let Some( action ) = global( view, key ) {
        return Some( action );
    }
    let list = match view {
        ViewMode::Filelist => ListId::Filelist,
        ViewMode::Playlist => ListId::Playlist,
        ViewMode::Help => return None,
    };
    if let Some( motion ) = motion( key, page ) {
        return Some( Action::Engine( Command::Cursor { list, motion } ) );
    }

    let engine = |command| Some( Action::Engine( command ) );
    match ( list, key.code ) {
        ( _, KeyCode::Char( '/' ) ) => Some( Action::Prompt( InputMode::Search { forward: true } ) ),
        ( _, KeyCode::Char( '?' ) ) => Some( Action::Prompt( InputMode::Search { forward: false } ) ),
        ( _, KeyCode::Char( 'l' ) ) => Some( Action::CycleListing ),
        ( _, KeyCode::Enter ) => engine( Command::PlaySelected { list } ),
        ( _, KeyCode::Char( ' ' ) ) => engine( Command::ToggleMark { list } ),
        ( _, KeyCode::Char( 't' ) ) => engine( Command::SetMark { list, marked: true } ),
        ( _, KeyCode::Char( 'u' ) ) => engine( Command::SetMark { list, marked: false } ),
        ( _, KeyCode::Char( 'i' ) ) => engine( Command::InvertMarks { list } ),
        ( _, KeyCode::Char( 'T' ) ) => Some( Action::Prompt( InputMode::MarkPattern { marked: true } ) ),
        ( _, KeyCode::Char( 'U' ) ) => Some( Action::Prompt( InputMode::MarkPattern { marked: false } ) ),

        ( ListId::Filelist, KeyCode::Char( '.' ) | KeyCode::Backspace ) => engine( Command::Parent ),
        ( ListId::Filelist, KeyCode::Char( 'a' ) ) => engine( Command::AddSelected ),
        ( ListId::Filelist, KeyCode::Char( 'o' ) ) => Some( Action::Prompt( InputMode::Goto ) ),
        ( ListId::Filelist, KeyCode::Char( 's' ) ) => Some( Action::Prompt( InputMode::Find ) ),
        ( ListId::Filelist, KeyCode::Char( 'm' ) ) => Some( Action::Prompt( InputMode::Bookmark { set: true } ) ),
        ( ListId::Filelist, KeyCode::Char( '\'' ) ) => Some( Action::Prompt( InputMode::Bookmark { set: false } ) ),

        ( ListId::Playlist, KeyCode::Char( 'd' ) | KeyCode::Delete ) => engine( Command::Remove ),
        ( ListId::Playlist, KeyCode::Char( 'D' ) ) => engine( Command::Clear ),
        ( ListId::Playlist, KeyCode::Char( 'm' ) ) => engine( Command::MoveSelected { delta: 1 } ),
        ( ListId::Playlist, KeyCode::Char( 'M' ) ) => engine( Command::MoveSelected { delta: -1 } ),
        ( ListId::Playlist, KeyCode::Char( 's' ) ) => engine( Command::Scramble ),
        ( ListId::Playlist, KeyCode::Char( 'S' ) ) => engine( Command::Sort ),
        ( ListId::Playlist, KeyCode::Char( 'r' ) ) => engine( Command::Repeat( None ) ),
        ( ListId::Playlist, KeyCode::Char( 'R' ) ) => engine( Command::Shuffle( None ) ),
        ( ListId::Playlist, KeyCode::Char( 'X' ) ) => engine( Command::StopAfter ),
        ( ListId::Playlist, KeyCode::Char( 'w' ) ) => Some( Action::Prompt( InputMode::Save ) ),
        ( ListId::Playlist, KeyCode::Char( '@' ) ) => engine( Command::JumpToActive ),
        _ => None,
    }
}


/// Keys that work in every view.
fn global( view: ViewMode, key: KeyEvent ) -> Option<Action> {
    let ctrl = key.modifiers.contains( KeyModifiers::CONTROL );
    let engine = |command| Some( Action::Engine( command ) );
    let seek = |secs| engine( Command::Seek( SeekTarget::Relative( secs ) ) );

    if ctrl {
        return match key.code {
            KeyCode::Char( 'b' ) => seek( -SEEK_STEP_SECS ),
            KeyCode::Char( 'f' ) => seek( SEEK_STEP_SECS ),
            KeyCode::Char( 'a' ) => engine( Command::Seek( SeekTarget::Absolute( Duration::ZERO ) ) ),
            KeyCode::Char( 'l' ) => Some( Action::Redraw ),
            KeyCode::Char( 'c' ) => engine( Command::Quit ),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Left => seek( -SEEK_STEP_SECS ),
        KeyCode::Right => seek( SEEK_STEP_SECS ),
        KeyCode::Char( '^' ) => engine( Command::Seek( SeekTarget::Absolute( Duration::ZERO ) ) ),
        KeyCode::Char( c @ '0'..='9' ) => {
            let digit = c as u16 - '0' as u16;
            engine( Command::Volume( VolumeChange::Set( ( digit * 100 / 9 ) as u8 ) ) )
        }
        KeyCode::Char( '+' | '=' ) => engine( Command::Volume( VolumeChange::Step( VOLUME_STEP ) ) ),
        KeyCode::Char( '-' ) => engine( Command::Volume( VolumeChange::Step( -VOLUME_STEP ) ) ),
        KeyCode::Char( 'n' ) => engine( Command::Next ),
        KeyCode::Char( 'p' ) => engine( Command::Prev ),
        KeyCode::Char( 'z' ) => engine( Command::TogglePause ),
        KeyCode::Char( 'x' ) => engine( Command::ToggleStop ),
        KeyCode::Char( 'c' ) => Some( Action::ToggleCounter ),
        KeyCode::Char( 'q' ) if view == ViewMode::Help => Some( Action::ToggleHelp ),
        KeyCode::Char( 'q' | 'Q' ) => engine( Command::Quit ),
        KeyCode::Char( 'h' ) => Some( Action::ToggleHelp ),
        KeyCode::Esc if view == ViewMode::Help => Some( Action::ToggleHelp ),
        KeyCode::Tab => Some( Action::SwitchView ),
        KeyCode::Char( ':' ) => Some( Action::Prompt( InputMode::Command ) ),
        _ => None,
    }
}


fn motion( key: KeyEvent, page: usize ) -> Option<Motion> {
    let ctrl = key.modifiers.contains( KeyModifiers::CONTROL );
    match key.code {
        KeyCode::Char( 'p' ) if ctrl => Some( Motion::Up ),
        KeyCode::Char( 'n' ) if ctrl => Some( Motion::Down ),
        KeyCode::Char( 'k' ) | KeyCode::Up => Some( Motion::Up ),
        KeyCode::Char( 'j' ) | KeyCode::Down => Some( Motion::Down ),
        KeyCode::Char( 'K' ) | KeyCode::PageUp => Some( Motion::PageUp( page ) ),
        KeyCode::Char( 'J' ) | KeyCode::PageDown => Some( Motion::PageDown( page ) ),
        KeyCode::Char( 'g' ) | KeyCode::Home => Some( Motion::Home ),
        KeyCode::Char( 'G' ) | KeyCode::End => Some( Motion::End ),
        _ => None,
    }
}


/// Key reference shown by the help view.
pub fn help_text() -> &'static str {
    r#"Global
  Left / C-b        seek backward         Right / C-f    seek forward
  ^ / C-a           seek to start         0..9           set volume
  + / -             volume up/down        n / p          next / previous
  z                 toggle pause          x              toggle stop
  c                 elapsed/remaining     :              command prompt
  Tab               switch list           h              help
  q / Q             quit

Lists
  j k / Down Up     move                  J K / PgDn PgUp  page
  g G / Home End    first / last          / ?            search
  Enter             play / open           l              listing style
  Space             toggle mark           t / u          mark / unmark
  i                 invert marks          T / U          mark / unmark by regex

Marked entries, when there are any, are what d, m, M and a act on.

Filelist
  . / Backspace     parent directory      a              add to playlist
  o                 go to directory       s              find below here
  m<key>            set bookmark          '<key>         go to bookmark

Playlist
  d                 remove                D              clear
  m / M             move down / up        s / S          scramble / sort
                    (marked: after / before the cursor entry)
  r                 cycle repeat          R              toggle shuffle
  X                 stop after track      w              save playlist
  @                 jump to playing"#
}


#[cfg( test )]
mod tests {
    use super::*;


    fn key( code: KeyCode ) -> KeyEvent {
        KeyEvent::new( code, KeyModifiers::NONE )
    }


    fn ctrl( c: char ) -> KeyEvent {
        KeyEvent::new( KeyCode::Char( c ), KeyModifiers::CONTROL )
    }


    #[test]
    fn test_global_playback_keys() {
        for view in [ ViewMode::Filelist, ViewMode::Playlist, ViewMode::Help ] {
            assert_eq!( map_key( view, key( KeyCode::Char( 'n' ) ), 10 ), Some( Action::Engine( Command::Next ) ) );
            assert_eq!( map_key( view, key( KeyCode::Char( 'z' ) ), 10 ), Some( Action::Engine( Command::TogglePause ) ) );
        }
        assert_eq!(
            map_key( ViewMode::Playlist, ctrl( 'b' ), 10 ),
            Some( Action::Engine( Command::Seek( SeekTarget::Relative( -10 ) ) ) )
        );
    }


    #[test]
    fn test_digit_volume() {
        let volume = |c| match map_key( ViewMode::Playlist, key( KeyCode::Char( c ) ), 10 ) {
            Some( Action::Engine( Command::Volume( VolumeChange::Set( v ) ) ) ) => v,
            other => panic!( "unexpected {:?}", other ),
        };
        assert_eq!( volume( '0' ), 0 );
        assert_eq!( volume( '9' ), 100 );
        assert_eq!( volume( '5' ), 55 );
    }


    #[test]
    fn test_list_keys_depend_on_view() {
        assert_eq!(
            map_key( ViewMode::Playlist, key( KeyCode::Char( 'd' ) ), 10 ),
            Some( Action::Engine( Command::Remove ) )
        );
        assert_eq!( map_key( ViewMode::Filelist, key( KeyCode::Char( 'd' ) ), 10 ), None );
        assert_eq!(
            map_key( ViewMode::Filelist, key( KeyCode::Char( 'a' ) ), 10 ),
            Some( Action::Engine( Command::AddSelected ) )
        );
        assert_eq!(
            map_key( ViewMode::Filelist, key( KeyCode::Enter ), 10 ),
            Some( Action::Engine( Command::PlaySelected { list: ListId::Filelist } ) )
        );
    }


    #[test]
    fn test_motions_use_page() {
        assert_eq!(
            map_key( ViewMode::Playlist, key( KeyCode::PageDown ), 17 ),
            Some( Action::Engine( Command::Cursor { list: ListId::Playlist, motion: Motion::PageDown( 17 ) } ) )
        );
        assert_eq!(
            map_key( ViewMode::Filelist, ctrl( 'p' ), 5 ),
            Some( Action::Engine( Command::Cursor { list: ListId::Filelist, motion: Motion::Up } ) )
        );
        assert_eq!( map_key( ViewMode::Help, key( KeyCode::Char( 'j' ) ), 5 ), None );
    }


    #[test]
    fn test_q_closes_help_before_quitting() {
        assert_eq!( map_key( ViewMode::Help, key( KeyCode::Char( 'q' ) ), 5 ), Some( Action::ToggleHelp ) );
        assert_eq!(
            map_key( ViewMode::Playlist, key( KeyCode::Char( 'q' ) ), 5 ),
            Some( Action::Engine( Command::Quit ) )
        );
    }


    #[test]
    fn test_mark_keys_follow_view() {
        assert_eq!(
            map_key( ViewMode::Filelist, key( KeyCode::Char( ' ' ) ), 5 ),
            Some( Action::Engine( Command::ToggleMark { list: ListId::Filelist } ) )
        );
        assert_eq!(
            map_key( ViewMode::Playlist, key( KeyCode::Char( 'u' ) ), 5 ),
            Some( Action::Engine( Command::SetMark { list: ListId::Playlist, marked: false } ) )
        );
        assert_eq!(
            map_key( ViewMode::Playlist, key( KeyCode::Char( 'T' ) ), 5 ),
            Some( Action::Prompt( InputMode::MarkPattern { marked: true } ) )
        );
        assert_eq!( map_key( ViewMode::Help, key( KeyCode::Char( 'i' ) ), 5 ), None );
    }


    #[test]
    fn test_filelist_find_and_bookmarks() {
        assert_eq!( map_key( ViewMode::Filelist, key( KeyCode::Char( 's' ) ), 5 ), Some( Action::Prompt( InputMode::Find ) ) );
        assert_eq!(
            map_key( ViewMode::Filelist, key( KeyCode::Char( 'm' ) ), 5 ),
            Some( Action::Prompt( InputMode::Bookmark { set: true } ) )
        );
        assert_eq!(
            map_key( ViewMode::Filelist, key( KeyCode::Char( '\'' ) ), 5 ),
            Some( Action::Prompt( InputMode::Bookmark { set: false } ) )
        );
        assert_eq!( map_key( ViewMode::Playlist, key( KeyCode::Char( 's' ) ), 5 ), Some( Action::Engine( Command::Scramble ) ) );
    }


    #[test]
    fn test_prompts() {
        assert_eq!( map_key( ViewMode::Playlist, key( KeyCode::Char( ':' ) ), 5 ), Some( Action::Prompt( InputMode::Command ) ) );
        assert_eq!( map_key( ViewMode::Filelist, key( KeyCode::Char( 'o' ) ), 5 ), Some( Action::Prompt( InputMode::Goto ) ) );
        assert_eq!( map_key( ViewMode::Playlist, key( KeyCode::Char( 'w' ) ), 5 ), Some( Action::Prompt( InputMode::Save ) ) );
        assert_eq!(
            map_key( ViewMode::Playlist, key( KeyCode::Char( '?' ) ), 5 ),
            Some( Action::Prompt( InputMode::Search { forward: false } ) )
        );
    }
}
