use serde::{Deserialize, Deserializer, Serialize};

/// A catalog record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub cover_image_url: String,
    #[serde(default)]
    pub page_count: u32,
}

/// A book on a user's reading list.
///
/// Dates are Unix timestamps in milliseconds. A rating below zero means the
/// book has not been rated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    pub id: String,
    pub book_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "unrated")]
    pub rating: i32,
    pub started_date: i64,
    pub finished_date: Option<i64>,
    pub book: Book,
}

const fn unrated() -> i32 {
    -1
}

impl ListItem {
    /// Returns `true` once the book has been marked as read.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished_date.is_some()
    }
}

/// A partial update of a [`ListItem`]. Unset fields are left alone.
///
/// ```
/// use bookshelf::books::ListItemUpdate;
///
/// let update = ListItemUpdate::new("li-1").notes("loved it").finished_at(1_700_000_000_000);
/// let json = serde_json::to_value(&update).unwrap();
/// assert_eq!(json["finishedDate"], 1_700_000_000_000_i64);
/// assert!(json.get("rating").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    /// `Some(None)` clears the date, i.e. marks the book unread.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub finished_date: Option<Option<i64>>,
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

impl ListItemUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            notes: None,
            rating: None,
            finished_date: None,
        }
    }

    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    #[must_use]
    pub const fn rating(mut self, rating: i32) -> Self {
        self.rating = Some(rating);
        self
    }

    /// Marks the book read at `timestamp`.
    #[must_use]
    pub const fn finished_at(mut self, timestamp: i64) -> Self {
        self.finished_date = Some(Some(timestamp));
        self
    }

    /// Marks the book unread.
    #[must_use]
    pub const fn unfinished(mut self) -> Self {
        self.finished_date = Some(None);
        self
    }

    /// Returns `item` with the set fields overwritten.
    #[must_use]
    pub fn apply(&self, item: &ListItem) -> ListItem {
        let mut item = item.clone();
        if let Some(notes) = &self.notes {
            item.notes.clone_from(notes);
        }
        if let Some(rating) = self.rating {
            item.rating = rating;
        }
        if let Some(finished_date) = self.finished_date {
            item.finished_date = finished_date;
        }
        item
    }
}
