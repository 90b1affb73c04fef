pub mod colmap;
pub mod nerfies;
pub mod npy;
pub mod ply;
pub mod transforms;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, info, warn};
use scene_source::{Filesystem, Source};
use serde::de::DeserializeOwned;
use crate::camera::SegmentMasks;
use crate::config::LoadConfig;
use crate::error::{FormatError, Result};
use crate::point_cloud::PointCloud;
use crate::{Dataset, DatasetError, SceneKind};

/// Opens a scene directory or archive and reads it with the matching reader.
pub async fn load_dataset(source: Source, config: &LoadConfig) -> Result<Dataset> {
    let scene_path = source.path().to_path_buf();
    let fs = source.into_fs().await?;
    load_dataset_from_fs(&fs, &scene_path, config).await
}

/// Reads a scene from an already indexed filesystem. `scene_path` is only used to name
/// the scene, e.g. to pick the split of nerfies captures.
pub async fn load_dataset_from_fs(fs: &Filesystem, scene_path: &Path, config: &LoadConfig) -> Result<Dataset> {
    let kind = detect_kind(fs).ok_or(DatasetError::FormatNotSupported)?;
    info!("Loading {kind:?} scene from {}", scene_path.display());

    let dataset = match kind {
        SceneKind::Colmap => colmap::read_colmap_scene(fs, config).await?,
        SceneKind::MultiView => transforms::read_multiview_scene(fs, scene_path, config).await?,
        SceneKind::Nerfies => nerfies::read_nerfies_scene(fs, scene_path, config).await?,
    };

    info!(
        "Loaded {} train and {} test cameras",
        dataset.train.len(),
        dataset.test.len()
    );
    Ok(dataset)
}

pub fn detect_kind(fs: &Filesystem) -> Option<SceneKind> {
    if fs.dir_exists(Path::new("sparse")) {
        Some(SceneKind::Colmap)
    } else if fs.exists(Path::new("transforms_train.json")) {
        Some(SceneKind::MultiView)
    } else if fs.exists(Path::new("dataset.json")) {
        Some(SceneKind::Nerfies)
    } else {
        None
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(fs: &Filesystem, path: &Path) -> std::result::Result<T, FormatError> {
    let bytes = fs.read_to_end(path).await?;
    serde_json::from_slice(&bytes).map_err(|source| FormatError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Locates the masks of a view. Missing masks are not an error, the view just has none.
pub(crate) async fn read_masks(
    fs: &Filesystem,
    mask_path: &Path,
    config: &LoadConfig,
) -> std::result::Result<(Option<SegmentMasks>, Option<PathBuf>), FormatError> {
    if !fs.exists(mask_path) {
        warn!("Masks not found: {}", mask_path.display());
        return Ok((None, None));
    }
    if config.load_mask_on_the_fly {
        return Ok((None, Some(mask_path.to_path_buf())));
    }

    let data = fs.read_to_end(mask_path).await?;
    let masks = SegmentMasks {
        path: mask_path.to_path_buf(),
        data: Arc::new(data),
    };
    Ok((Some(masks), Some(mask_path.to_path_buf())))
}

/// Reads a ply point cloud, treating an unreadable file as no cloud at all.
pub(crate) async fn load_point_cloud(fs: &Filesystem, path: &Path) -> Option<PointCloud> {
    let reader = match fs.reader_at_path(path).await {
        Ok(reader) => reader,
        Err(e) => {
            warn!("Could not open point cloud {}: {e}", path.display());
            return None;
        }
    };
    match ply::parse_ply(reader).await {
        Ok(cloud) => Some(cloud),
        Err(e) => {
            warn!("Could not read point cloud {}: {e}", path.display());
            None
        }
    }
}

/// Writes a cache file next to the scene. Archives are read-only, there the data
/// only lives in memory.
pub(crate) async fn write_cache(fs: &Filesystem, path: &Path, bytes: Vec<u8>) -> std::result::Result<(), FormatError> {
    match fs.writable_path(path) {
        Some(full) => {
            debug!("Writing {}", full.display());
            tokio::fs::write(&full, bytes).await?;
        }
        None => debug!("Scene is read-only, not caching {}", path.display()),
    }
    Ok(())
}

pub(crate) async fn store_point_cloud(fs: &Filesystem, path: &Path, cloud: &PointCloud) -> std::result::Result<(), FormatError> {
    write_cache(fs, path, ply::encode_ply(cloud)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_marker_files() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Filesystem::from_dir(dir.path()).unwrap();
        assert_eq!(detect_kind(&fs), None);

        std::fs::write(dir.path().join("dataset.json"), "{}").unwrap();
        assert_eq!(detect_kind(&fs), Some(SceneKind::Nerfies));

        std::fs::write(dir.path().join("transforms_train.json"), "{}").unwrap();
        assert_eq!(detect_kind(&fs), Some(SceneKind::MultiView));

        std::fs::create_dir(dir.path().join("sparse")).unwrap();
        assert_eq!(detect_kind(&fs), Some(SceneKind::Colmap));
    }

    #[tokio::test]
    async fn unknown_scenes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "nothing here").unwrap();
        let source = Source::Dir { path: dir.path().to_path_buf() };
        let result = load_dataset(source, &LoadConfig::new()).await;
        assert!(matches!(result, Err(DatasetError::FormatNotSupported)));
    }
}
