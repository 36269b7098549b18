use std::path::PathBuf;

/// Where the application keeps files it owns. Downloads go wherever the
/// settings say; this only supplies the defaults.
pub trait AppPaths: Send + Sync {
    fn downloads_dir(&self) -> PathBuf;
    fn data_dir(&self) -> Option<PathBuf>;

    /// Tools the application installs itself, such as a downloaded yt-dlp.
    fn bin_dir(&self) -> Option<PathBuf> {
        self.data_dir().map(|d| d.join("bin"))
    }
}

pub struct DesktopPaths;

impl AppPaths for DesktopPaths {
    fn downloads_dir(&self) -> PathBuf {
        dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    fn data_dir(&self) -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("tunefetch"))
    }
}
