use std::io;
use std::io::Cursor;
use std::path::Path;
use glam::UVec2;
use image::{DynamicImage, ImageDecoder, ImageError, ImageReader, ImageResult, RgbImage, RgbaImage};
use scene_source::Filesystem;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads just enough of an image to know its size.
pub async fn image_dimensions(fs: &Filesystem, path: &Path) -> io::Result<UVec2> {
    let mut reader = fs.reader_at_path(path).await?;
    preliminary_data(&mut reader).await
}

pub async fn load_image(fs: &Filesystem, path: &Path) -> ImageResult<DynamicImage> {
    let bytes = fs.read_to_end(path).await?;
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| ImageError::IoError(e.into()))?
}

/// Blends an image with straight alpha over a solid white or black background.
///
/// The alpha channel is kept only if some pixel is actually transparent.
pub fn composite_background(image: DynamicImage, white_background: bool) -> DynamicImage {
    if !image.color().has_alpha() {
        return image;
    }

    let bg = if white_background { 1.0 } else { 0.0 };
    let rgba = image.into_rgba8();
    let (w, h) = rgba.dimensions();
    let transparent = rgba.pixels().any(|p| p[3] < 255);

    // Straight alpha in, composited colors out. Values truncate like a byte cast.
    let blend = |c: u8, a: f32| (c as f32 * a + bg * 255.0 * (1.0 - a)) as u8;

    if transparent {
        let mut out = RgbaImage::new(w, h);
        for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
            let a = src[3] as f32 / 255.0;
            *dst = image::Rgba([blend(src[0], a), blend(src[1], a), blend(src[2], a), src[3]]);
        }
        DynamicImage::ImageRgba8(out)
    } else {
        let mut out = RgbImage::new(w, h);
        for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
            *dst = image::Rgb([src[0], src[1], src[2]]);
        }
        DynamicImage::ImageRgb8(out)
    }
}

async fn preliminary_data<R>(reader: &mut R) -> io::Result<UVec2>
    where R: AsyncRead + Unpin {
    // The maximum size before the entire SOF of JPEG is read is 65548 bytes. Start smaller and
    // keep growing until the decoder can figure out the dimensions.
    let mut temp_buf = vec![0; 16387];

    let mut n = 0;
    loop {
        let read = reader.read(&mut temp_buf[n..]).await?;
        n += read;

        // Try to decode with what we have (nb, no copying happens here).
        if let Ok(decoder) = ImageReader::new(Cursor::new(&temp_buf[..n]))
            .with_guessed_format()?
            .into_decoder()
        {
            return Ok(decoder.dimensions().into());
        }

        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Reached end of file while trying to decode image format",
            ));
        }

        if n == temp_buf.len() {
            temp_buf.resize(temp_buf.len() * 2, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_images_drop_alpha() {
        let img = RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
        let out = composite_background(DynamicImage::ImageRgba8(img), true);
        assert!(!out.color().has_alpha());
        assert_eq!(out.to_rgb8().get_pixel(1, 1).0, [10, 20, 30]);
    }

    #[test]
    fn transparent_pixels_blend_into_background() {
        let mut img = RgbaImage::from_pixel(2, 1, image::Rgba([200, 100, 0, 255]));
        img.put_pixel(1, 0, image::Rgba([200, 100, 0, 0]));

        let white = composite_background(DynamicImage::ImageRgba8(img.clone()), true).to_rgba8();
        assert_eq!(white.get_pixel(1, 0).0, [255, 255, 255, 0]);
        assert_eq!(white.get_pixel(0, 0).0, [200, 100, 0, 255]);

        let black = composite_background(DynamicImage::ImageRgba8(img), false).to_rgba8();
        assert_eq!(black.get_pixel(1, 0).0, [0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn reads_dimensions_from_header() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(17, 9).save(dir.path().join("frame.png")).unwrap();
        let fs = Filesystem::from_dir(dir.path()).unwrap();

        let dim = image_dimensions(&fs, Path::new("frame.png")).await.unwrap();
        assert_eq!(dim, glam::uvec2(17, 9));
        let img = load_image(&fs, Path::new("frame.png")).await.unwrap();
        assert_eq!(img.width(), 17);
    }
}
