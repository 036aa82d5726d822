//! Wire format spoken with the canvas service.
//!
//! Fetching is a GET with tile bounds in the query string. The response is a
//! JSON object keyed by `"tileY,tileX"`, with `null` for empty tiles:
//!
//! ```json
//! { "0,-1": { "content": "<128 chars>", "properties": {} }, "0,0": null }
//! ```
//!
//! Edits are form-posted as `edits=<json>`. Each edit is
//! `[tileY, tileX, charY, charX, timestamp_ms, char, client_tag]`.

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

use crate::cache::{Tile, TileCoord};
use crate::sync::queue::EditRecord;

/// Protocol revision sent with every fetch.
pub const FETCH_VERSION: u32 = 3;

/// Cookie the service uses to carry the anti-forgery token.
pub const CSRF_COOKIE: &str = "csrftoken";

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
    #[error("invalid tile key '{0}'")]
    InvalidTileKey(String),
}

/// Inclusive tile-coordinate rectangle covered by one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub min: TileCoord,
    pub max: TileCoord,
}

impl FetchRequest {
    pub fn new(min: TileCoord, max: TileCoord) -> Self {
        Self { min, max }
    }

    pub fn tile_count(&self) -> usize {
        let cols = (self.max.tx - self.min.tx + 1).max(0);
        let rows = (self.max.ty - self.min.ty + 1).max(0);
        (cols * rows) as usize
    }

    pub fn query_pairs(&self) -> [(&'static str, String); 6] {
        [
            ("fetch", "1".to_string()),
            ("min_tileX", self.min.tx.to_string()),
            ("min_tileY", self.min.ty.to_string()),
            ("max_tileX", self.max.tx.to_string()),
            ("max_tileY", self.max.ty.to_string()),
            ("v", FETCH_VERSION.to_string()),
        ]
    }
}

#[derive(Debug, Deserialize)]
struct WireTile {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    properties: Value,
}

/// Decode a fetch response into tiles ready for ingestion.
///
/// A body that is not a JSON object, or that has an unparseable key, fails as
/// a whole. An individual tile with missing or wrong-length content becomes a
/// blank tile instead.
pub fn decode_fetch_response(body: &str) -> Result<Vec<(TileCoord, Tile)>, ProtocolError> {
    let raw: HashMap<String, Value> = serde_json::from_str(body)?;
    let mut tiles = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        let coord = parse_tile_key(&key)?;
        tiles.push((coord, decode_tile(coord, value)));
    }
    Ok(tiles)
}

fn decode_tile(coord: TileCoord, value: Value) -> Tile {
    if value.is_null() {
        return Tile::blank();
    }
    let wire = match serde_json::from_value::<WireTile>(value) {
        Ok(wire) => wire,
        Err(err) => {
            warn!(target = "protocol::fetch", tile = %coord, error = %err, "unreadable tile; rendering blank");
            return Tile::blank();
        }
    };
    let properties = wire.properties;
    match wire.content {
        Some(content) => match Tile::from_content(&content) {
            Ok(tile) => tile.with_properties(properties),
            Err(err) => {
                warn!(target = "protocol::fetch", tile = %coord, error = %err, "bad tile content; rendering blank");
                Tile::blank().with_properties(properties)
            }
        },
        None => {
            warn!(target = "protocol::fetch", tile = %coord, "tile without content; rendering blank");
            Tile::blank().with_properties(properties)
        }
    }
}

/// Parse a `"row,col"` key (tile y first) into a tile coordinate.
pub fn parse_tile_key(key: &str) -> Result<TileCoord, ProtocolError> {
    let invalid = || ProtocolError::InvalidTileKey(key.to_string());
    let (row, col) = key.split_once(',').ok_or_else(invalid)?;
    let ty = row.trim().parse::<i64>().map_err(|_| invalid())?;
    let tx = col.trim().parse::<i64>().map_err(|_| invalid())?;
    Ok(TileCoord::new(tx, ty))
}

/// JSON array of edits in the order given.
pub fn encode_edits(edits: &[EditRecord]) -> String {
    let entries: Vec<Value> = edits
        .iter()
        .map(|edit| {
            let tile = edit.tile();
            let offset = edit.offset();
            json!([
                tile.ty,
                tile.tx,
                offset.row(),
                offset.col(),
                edit.timestamp_ms(),
                edit.ch().to_string(),
                edit.client_tag(),
            ])
        })
        .collect();
    Value::Array(entries).to_string()
}

/// Form fields for a flush POST.
pub fn edits_form(edits: &[EditRecord]) -> [(&'static str, String); 1] {
    [("edits", encode_edits(edits))]
}

/// Session cookie and anti-forgery token needed for writes.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    cookie: String,
    csrf_token: String,
}

impl SessionCredential {
    pub fn new(cookie: impl Into<String>, csrf_token: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
            csrf_token: csrf_token.into(),
        }
    }

    /// Value for the `Cookie` request header.
    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    /// Build a credential from the `Set-Cookie` headers of the bootstrap
    /// response. Every cookie is echoed back; the token is the value after
    /// `=` of the CSRF cookie, or of the first cookie if none is named so.
    pub fn from_set_cookie<'a, I>(headers: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let pairs: Vec<(&str, &str)> = headers
            .into_iter()
            .filter_map(|header| {
                let pair = header.split(';').next()?.trim();
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then_some((name, value.trim()))
            })
            .collect();

        let (_, token) = pairs
            .iter()
            .find(|(name, _)| *name == CSRF_COOKIE)
            .or_else(|| pairs.first())?;
        if token.is_empty() {
            return None;
        }
        let cookie = pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        Some(Self::new(cookie, *token))
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("cookie", &"<redacted>")
            .field("csrf_token", &"<redacted>")
            .finish()
    }
}
