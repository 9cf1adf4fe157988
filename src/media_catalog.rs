//! Read contract of the on-device storage catalog.
//!
//! The platform owns the actual media index; reconciliation only needs this
//! narrow query surface. Hosts supply a concrete implementation.

/// One audio row as reported by the storage catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSong {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub artist_id: i64,
    pub album: String,
    pub album_id: i64,
    pub duration_ms: i64,
    pub path: String,
    pub track_number: i32,
    pub year: i32,
    /// Epoch seconds the row was added to the catalog.
    pub date_added: i64,
    pub size_bytes: i64,
}

/// One genre row from the catalog's genre table.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogGenre {
    pub id: i64,
    pub name: String,
}

/// Failure classes surfaced by catalog queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The host has not granted media-read permission.
    PermissionDenied(String),
    Backend(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::PermissionDenied(detail) => {
                write!(f, "storage permission denied: {}", detail)
            }
            CatalogError::Backend(detail) => write!(f, "catalog query failed: {}", detail),
        }
    }
}

impl std::error::Error for CatalogError {}

/// Interface implemented by the platform's media catalog.
pub trait MediaCatalog: Send {
    /// Returns all audio rows longer than `min_duration_ms`, ordered by
    /// title. The is-audio filter is applied by the catalog itself.
    fn query_music(&self, min_duration_ms: i64) -> Result<Vec<CatalogSong>, CatalogError>;

    /// Returns the catalog's genre table.
    fn genres(&self) -> Result<Vec<CatalogGenre>, CatalogError>;

    /// Returns the song ids recorded as members of one genre.
    fn genre_member_ids(&self, genre_id: i64) -> Result<Vec<i64>, CatalogError>;

    /// Whether the catalog can open a local artwork stream for the album.
    fn has_local_album_art(&self, album_id: i64) -> bool;

    /// Artwork reference the catalog associates with the album.
    fn album_art_uri(&self, album_id: i64) -> String;
}
