//! Ordered playlist container for presentation layers.
//!
//! Row/role access mirrors what list views expect: a row count, per-row
//! lookup by a fixed set of named roles, and insertion notifications sent
//! to registered [`PlaylistObserver`]s before and after each mutation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A single playlist entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub title: String,
    /// Track length in seconds.
    pub duration_secs: u64,
    pub artist: String,
    /// User rating, 0-5.
    pub rating: u8,
    /// Album art URL.
    pub image: Option<String>,
    /// UPnP item class, e.g. `object.item.audioItem.musicTrack`.
    pub item_class: String,
    /// Child count for containers.
    pub count: u32,
}

/// Attribute of a row that can be looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Title,
    Duration,
    Artist,
    Rating,
    Image,
    ItemClass,
    Count,
    IsPlaying,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Title,
        Role::Duration,
        Role::Artist,
        Role::Rating,
        Role::Image,
        Role::ItemClass,
        Role::Count,
        Role::IsPlaying,
    ];

    /// Name exposed to the presentation layer.
    pub fn name(self) -> &'static str {
        match self {
            Role::Title => "title",
            Role::Duration => "duration",
            Role::Artist => "artist",
            Role::Rating => "rating",
            Role::Image => "image",
            Role::ItemClass => "itemClass",
            Role::Count => "count",
            Role::IsPlaying => "isPlaying",
        }
    }
}

/// Value returned by [`PlaylistModel::data`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RoleValue {
    Text(String),
    Number(u64),
    Bool(bool),
}

/// Receives row change notifications.
///
/// `first` and `last` are inclusive row indices.
pub trait PlaylistObserver: Send + Sync {
    /// Called before rows `first..=last` are inserted.
    fn rows_about_to_be_inserted(&self, first: usize, last: usize);

    /// Called after rows `first..=last` were inserted.
    fn rows_inserted(&self, first: usize, last: usize);

    /// Called after the data of rows `first..=last` changed.
    fn data_changed(&self, _first: usize, _last: usize) {}
}

/// Ordered list of playlist items with a current-track marker.
#[derive(Default)]
pub struct PlaylistModel {
    items: Vec<PlaylistItem>,
    playing: Option<usize>,
    observers: Vec<Arc<dyn PlaylistObserver>>,
}

impl PlaylistModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer for row notifications.
    pub fn add_observer(&mut self, observer: Arc<dyn PlaylistObserver>) {
        self.observers.push(observer);
    }

    pub fn row_count(&self) -> usize {
        self.items.len()
    }

    pub fn item(&self, row: usize) -> Option<&PlaylistItem> {
        self.items.get(row)
    }

    /// Looks up one attribute of a row. `None` for an out-of-range row or
    /// an unset image.
    pub fn data(&self, row: usize, role: Role) -> Option<RoleValue> {
        let item = self.items.get(row)?;
        let value = match role {
            Role::Title => RoleValue::Text(item.title.clone()),
            Role::Duration => RoleValue::Number(item.duration_secs),
            Role::Artist => RoleValue::Text(item.artist.clone()),
            Role::Rating => RoleValue::Number(u64::from(item.rating)),
            Role::Image => RoleValue::Text(item.image.clone()?),
            Role::ItemClass => RoleValue::Text(item.item_class.clone()),
            Role::Count => RoleValue::Number(u64::from(item.count)),
            Role::IsPlaying => RoleValue::Bool(self.playing == Some(row)),
        };
        Some(value)
    }

    /// Every role with its exposed name.
    pub fn role_names(&self) -> Vec<(Role, &'static str)> {
        Role::ALL.iter().map(|r| (*r, r.name())).collect()
    }

    /// Appends items at the end, notifying observers around the insert.
    ///
    /// An empty batch is a no-op and sends no notification.
    pub fn append(&mut self, items: impl IntoIterator<Item = PlaylistItem>) {
        let items: Vec<_> = items.into_iter().collect();
        if items.is_empty() {
            return;
        }
        let first = self.items.len();
        let last = first + items.len() - 1;

        for observer in &self.observers {
            observer.rows_about_to_be_inserted(first, last);
        }
        self.items.extend(items);
        for observer in &self.observers {
            observer.rows_inserted(first, last);
        }
    }

    /// Marks `row` as the playing item, or clears the marker with `None`.
    ///
    /// Returns `false` and changes nothing if `row` is out of range.
    pub fn set_playing(&mut self, row: Option<usize>) -> bool {
        if row.is_some_and(|r| r >= self.items.len()) {
            return false;
        }
        let previous = std::mem::replace(&mut self.playing, row);
        if previous == row {
            return true;
        }
        for changed in [previous, row].into_iter().flatten() {
            for observer in &self.observers {
                observer.data_changed(changed, changed);
            }
        }
        true
    }

    pub fn playing(&self) -> Option<usize> {
        self.playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        changed_rows: Mutex<Vec<usize>>,
    }

    impl PlaylistObserver for Recorder {
        fn rows_about_to_be_inserted(&self, first: usize, last: usize) {
            self.calls.lock().push(format!("before {}..={}", first, last));
        }

        fn rows_inserted(&self, first: usize, last: usize) {
            self.calls.lock().push(format!("after {}..={}", first, last));
        }

        fn data_changed(&self, first: usize, last: usize) {
            self.changed_rows.lock().push(first);
            assert_eq!(first, last);
        }
    }

    fn track(title: &str) -> PlaylistItem {
        PlaylistItem {
            title: title.to_string(),
            duration_secs: 215,
            artist: "Artist".into(),
            rating: 4,
            image: None,
            item_class: "object.item.audioItem.musicTrack".into(),
            count: 0,
        }
    }

    #[test]
    fn append_notifies_before_and_after() {
        let recorder = Arc::new(Recorder::default());
        let mut model = PlaylistModel::new();
        model.add_observer(recorder.clone());

        model.append([track("a"), track("b")]);
        model.append([track("c")]);

        assert_eq!(model.row_count(), 3);
        assert_eq!(
            *recorder.calls.lock(),
            ["before 0..=1", "after 0..=1", "before 2..=2", "after 2..=2"]
        );
    }

    #[test]
    fn empty_append_is_silent() {
        let recorder = Arc::new(Recorder::default());
        let mut model = PlaylistModel::new();
        model.add_observer(recorder.clone());

        model.append(Vec::new());

        assert_eq!(model.row_count(), 0);
        assert!(recorder.calls.lock().is_empty());
    }

    #[test]
    fn data_by_role() {
        let mut model = PlaylistModel::new();
        model.append([PlaylistItem {
            image: Some("http://10.0.0.5/art.jpg".into()),
            ..track("Song")
        }]);

        assert_eq!(model.data(0, Role::Title), Some(RoleValue::Text("Song".into())));
        assert_eq!(model.data(0, Role::Duration), Some(RoleValue::Number(215)));
        assert_eq!(model.data(0, Role::Rating), Some(RoleValue::Number(4)));
        assert_eq!(
            model.data(0, Role::Image),
            Some(RoleValue::Text("http://10.0.0.5/art.jpg".into()))
        );
        assert_eq!(model.data(0, Role::IsPlaying), Some(RoleValue::Bool(false)));
        assert_eq!(model.data(1, Role::Title), None);
    }

    #[test]
    fn set_playing_moves_marker() {
        let recorder = Arc::new(Recorder::default());
        let mut model = PlaylistModel::new();
        model.add_observer(recorder.clone());
        model.append([track("a"), track("b")]);

        assert!(model.set_playing(Some(0)));
        assert!(model.set_playing(Some(1)));
        assert!(!model.set_playing(Some(5)));

        assert_eq!(model.playing(), Some(1));
        assert_eq!(model.data(0, Role::IsPlaying), Some(RoleValue::Bool(false)));
        assert_eq!(model.data(1, Role::IsPlaying), Some(RoleValue::Bool(true)));
        assert_eq!(*recorder.changed_rows.lock(), [0, 0, 1]);
    }

    #[test]
    fn role_names_cover_every_role() {
        let model = PlaylistModel::new();
        let names: Vec<_> = model.role_names().into_iter().map(|(_, n)| n).collect();
        assert_eq!(
            names,
            ["title", "duration", "artist", "rating", "image", "itemClass", "count", "isPlaying"]
        );
    }
}
