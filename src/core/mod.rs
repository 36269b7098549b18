pub mod direct_downloader;
pub mod events;
pub mod ffmpeg;
pub mod process;
pub mod ytdlp;
