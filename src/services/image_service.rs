use std::path::Path;

use image::ImageReader;

pub type Bitmap = image::DynamicImage;

/// Extensions considered for OCR. Lower-case, without the dot.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    // Raster
    "png", "apng", "jpg", "jpeg", "webp", "webp2", "bmp", "tif", "tiff", "btf", "gif", "ico",
    "cur", "icns", "heic", "heif", "hif", "avif", "jp2", "j2k", "jpf", "jxl", "jpxl", "flif",
    "qoi", "dds", "tga", "pbm", "pgm", "ppm", "exr", "hdr", "pcx", "pict", "wbmp", "xpm",
    "xwd", "otb", "ras", "sgi", "rla", "rpf", "iff", "lbm", "vda", "icb", "vst", "pix", "blp",
    "vtf", "gbr", "cin", "dpx", "mng", "pvr", "tim", "fpx", "qif", "liff",
    // Vector
    "svg", "eps", "ai", "wmf", "emf", "cgm", "sk1",
    // Camera raw
    "cr2", "cr3", "nef", "arw", "orf", "rw2", "dng", "x3f", "mef", "mos", "pef", "srw", "bay",
    "r3d", "raw", "raw16",
    // Layered editor documents
    "psd", "xcf",
    // Video stills
    "mp4", "gifv", "xif",
];

/// How a file extension is decoded. Each family owns one loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFamily {
    Raster,
    Vector,
    CameraRaw,
    Layered,
    VideoFrame,
    Other,
}

impl std::fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raster => write!(f, "raster"),
            Self::Vector => write!(f, "vector"),
            Self::CameraRaw => write!(f, "camera_raw"),
            Self::Layered => write!(f, "layered"),
            Self::VideoFrame => write!(f, "video_frame"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no decoder for {0} images")]
    Unsupported(FormatFamily),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

const RASTER_DECODABLE: &[&str] = &[
    "png", "apng", "jpg", "jpeg", "webp", "bmp", "tif", "tiff", "gif", "ico", "qoi", "dds",
    "tga", "pbm", "pgm", "ppm", "hdr",
];

pub fn is_image_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str())
}

pub fn family_for_extension(ext: &str) -> FormatFamily {
    let ext = ext.to_ascii_lowercase();
    match ext.as_str() {
        e if RASTER_DECODABLE.contains(&e) => FormatFamily::Raster,
        "svg" | "eps" | "ai" | "wmf" | "emf" | "cgm" | "sk1" => FormatFamily::Vector,
        "cr2" | "cr3" | "nef" | "arw" | "orf" | "rw2" | "dng" | "x3f" | "mef" | "mos" | "pef"
        | "srw" | "bay" | "r3d" | "raw" | "raw16" => FormatFamily::CameraRaw,
        "psd" | "xcf" => FormatFamily::Layered,
        "mp4" | "gifv" => FormatFamily::VideoFrame,
        _ => FormatFamily::Other,
    }
}

fn load_raster(path: &Path) -> Result<Bitmap, LoadError> {
    // sniff the header, extensions lie often enough
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    Ok(reader.decode()?)
}

pub fn try_load_image(path: &Path) -> Result<Bitmap, LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match family_for_extension(ext) {
        FormatFamily::Raster => load_raster(path),
        other => Err(LoadError::Unsupported(other)),
    }
}

/// Decoding boundary: any failure is reported as `None`.
pub fn load_image(path: &Path) -> Option<Bitmap> {
    match try_load_image(path) {
        Ok(bitmap) => Some(bitmap),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "image not loaded");
            None
        }
    }
}
