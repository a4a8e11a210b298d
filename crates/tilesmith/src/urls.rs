//! Public URL shapes for generated tiles.

use crate::identity::TileId;

/// `{base}/tiles/{id}/{z}/{x}/{y}.{ext}` with the placeholders left literal.
pub fn tile_url_template(base_url: &str, tile_id: &TileId, extension: &str) -> String {
    format!(
        "{}/tiles/{}/{{z}}/{{x}}/{{y}}.{}",
        trim_base(base_url),
        tile_id,
        extension
    )
}

/// The single zoom-0 tile, used as a preview image.
pub fn thumbnail_url(base_url: &str, tile_id: &TileId, extension: &str) -> String {
    format!("{}/tiles/{}/0/0/0.{}", trim_base(base_url), tile_id, extension)
}

/// Stand-in image served while tiles are still being generated.
pub fn placeholder_url(base_url: &str, tile_id: &TileId) -> String {
    format!("{}/api/tile-placeholder/{}", trim_base(base_url), tile_id)
}

fn trim_base(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::identifier_for;

    #[test]
    fn test_tile_url_template() {
        let id = identifier_for("https://example.com/galaxy.tif");
        assert_eq!(
            tile_url_template("http://localhost:8000", &id, "png"),
            format!("http://localhost:8000/tiles/{}/{{z}}/{{x}}/{{y}}.png", id)
        );
    }

    #[test]
    fn test_trailing_slash_on_base_is_ignored() {
        let id = identifier_for("https://example.com/galaxy.tif");
        assert_eq!(
            thumbnail_url("https://maps.example.org/", &id, "png"),
            format!("https://maps.example.org/tiles/{}/0/0/0.png", id)
        );
        assert_eq!(
            placeholder_url("https://maps.example.org//", &id),
            format!("https://maps.example.org/api/tile-placeholder/{}", id)
        );
    }
}
