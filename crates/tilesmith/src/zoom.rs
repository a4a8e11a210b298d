//! Zoom-level arithmetic and tile-tree inspection.

use std::path::Path;

use walkdir::WalkDir;

/// Highest zoom level worth generating for an image of the given size.
///
/// `ceil(log2(max(width, height) / tile_size))`, clamped to `0..=cap`.
pub fn compute_max_zoom(width: u32, height: u32, tile_size: u32, cap: u8) -> u8 {
    let max_dimension = width.max(height);
    if max_dimension == 0 || tile_size == 0 {
        return 0;
    }

    let raw = (f64::from(max_dimension) / f64::from(tile_size)).log2().ceil();
    raw.clamp(0.0, f64::from(cap)) as u8
}

/// Rough number of tiles a full XYZ pyramid holds from zoom 0 to `max_zoom`.
pub fn expected_tile_count(max_zoom: u8) -> u64 {
    (0..=u32::from(max_zoom))
        .map(|z| 4u64.saturating_pow(z))
        .fold(0u64, u64::saturating_add)
}

/// Min and max zoom levels present as numeric subdirectories of `dir`.
///
/// Returns `None` when the directory is missing or holds no zoom levels.
pub fn discover_zoom_range(dir: &Path) -> Option<(u8, u8)> {
    let entries = std::fs::read_dir(dir).ok()?;

    let levels: Vec<u8> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            name.parse::<u8>().ok()
        })
        .collect();

    let min = levels.iter().copied().min()?;
    let max = levels.iter().copied().max()?;
    Some((min, max))
}

/// Number of tile files with the given extension anywhere below `dir`.
pub fn count_tiles(dir: &Path, extension: &str) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_single_tile_image_is_zoom_zero() {
        assert_eq!(compute_max_zoom(256, 256, 256, 12), 0);
    }

    #[test]
    fn test_wide_image_uses_larger_dimension() {
        assert_eq!(compute_max_zoom(512, 256, 256, 12), 1);
        assert_eq!(compute_max_zoom(256, 512, 256, 12), 1);
    }

    #[test]
    fn test_andromeda_dimensions() {
        assert_eq!(compute_max_zoom(69536, 22230, 256, 12), 9);
    }

    #[test]
    fn test_gigapixel_image_is_clamped() {
        assert_eq!(compute_max_zoom(100_000, 100_000, 256, 12), 9);
        assert_eq!(compute_max_zoom(2_000_000, 10, 256, 12), 12);
        assert_eq!(compute_max_zoom(u32::MAX, u32::MAX, 256, 12), 12);
    }

    #[test]
    fn test_tiny_and_degenerate_images() {
        assert_eq!(compute_max_zoom(100, 50, 256, 12), 0);
        assert_eq!(compute_max_zoom(0, 0, 256, 12), 0);
        assert_eq!(compute_max_zoom(257, 1, 256, 12), 1);
    }

    #[test]
    fn test_expected_tile_count() {
        assert_eq!(expected_tile_count(0), 1);
        assert_eq!(expected_tile_count(1), 5);
        assert_eq!(expected_tile_count(2), 21);
    }

    #[test]
    fn test_discover_zoom_range() {
        let tmp = TempDir::new().unwrap();
        for z in ["0", "2", "5"] {
            std::fs::create_dir(tmp.path().join(z)).unwrap();
        }
        std::fs::create_dir(tmp.path().join("openlayers")).unwrap();
        std::fs::write(tmp.path().join("7"), b"not a dir").unwrap();

        assert_eq!(discover_zoom_range(tmp.path()), Some((0, 5)));
    }

    #[test]
    fn test_discover_zoom_range_empty_or_missing() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(discover_zoom_range(tmp.path()), None);
        assert_eq!(discover_zoom_range(&tmp.path().join("missing")), None);
    }

    #[test]
    fn test_count_tiles_matches_extension() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("1").join("0");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("0.png"), b"x").unwrap();
        std::fs::write(dir.join("1.PNG"), b"x").unwrap();
        std::fs::write(dir.join("1.png.aux.xml"), b"x").unwrap();
        std::fs::write(tmp.path().join("tilemapresource.xml"), b"x").unwrap();

        assert_eq!(count_tiles(tmp.path(), "png"), 2);
        assert_eq!(count_tiles(&tmp.path().join("missing"), "png"), 0);
    }
}
