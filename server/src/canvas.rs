//! Pixel grid backing a zone

use crate::error::ZoneError;
use image::{DynamicImage, GenericImageView, RgbaImage};
use shared::{Color, Point};

/// Row-major grid of colors, `size.x` wide and `size.y` tall.
#[derive(Debug, Clone)]
pub struct Canvas {
    size: Point,
    pixels: Vec<Color>,
}

impl Canvas {
    /// Allocates a fully transparent canvas. Both dimensions must be positive.
    pub fn new(size: Point) -> Result<Self, ZoneError> {
        if size.x <= 0 || size.y <= 0 {
            return Err(ZoneError::InvalidSize(size));
        }

        let len = (size.x as usize)
            .checked_mul(size.y as usize)
            .ok_or(ZoneError::CanvasTooLarge(size))?;

        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| ZoneError::CanvasTooLarge(size))?;
        pixels.resize(len, Color::TRANSPARENT);

        Ok(Self { size, pixels })
    }

    /// Bytes a canvas of `size` occupies. Saturates instead of overflowing.
    pub fn byte_size(size: Point) -> u64 {
        let width = size.x.max(0) as u64;
        let height = size.y.max(0) as u64;
        width
            .saturating_mul(height)
            .saturating_mul(std::mem::size_of::<Color>() as u64)
    }

    pub fn size(&self) -> Point {
        self.size
    }

    fn index(&self, point: Point) -> Option<usize> {
        if point.is_negative() || point.x >= self.size.x || point.y >= self.size.y {
            return None;
        }
        Some(point.y as usize * self.size.x as usize + point.x as usize)
    }

    pub fn get(&self, point: Point) -> Option<Color> {
        self.index(point).map(|i| self.pixels[i])
    }

    /// Overwrites one pixel. Returns false when `point` is off the canvas.
    pub fn set(&mut self, point: Point, color: Color) -> bool {
        match self.index(point) {
            Some(i) => {
                self.pixels[i] = color;
                true
            }
            None => false,
        }
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    pub fn to_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.size.x as u32, self.size.y as u32, |x, y| {
            let color = self.pixels[y as usize * self.size.x as usize + x as usize];
            image::Rgba(color.to_array())
        })
    }

    /// Copies the non-transparent pixels of an RGBA image onto the canvas.
    pub fn load_image(&mut self, img: &DynamicImage) -> Result<(), ZoneError> {
        let DynamicImage::ImageRgba8(rgba) = img else {
            return Err(ZoneError::UnsupportedColorModel);
        };

        let (width, height) = img.dimensions();
        if width > self.size.x as u32 || height > self.size.y as u32 {
            return Err(ZoneError::ImageTooLarge {
                width,
                height,
                zone: self.size,
            });
        }

        for (x, y, pixel) in rgba.enumerate_pixels() {
            if pixel.0[3] == 0 {
                continue;
            }
            self.set(Point::new(x as i32, y as i32), Color::from_array(pixel.0));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_canvas_is_transparent() {
        let canvas = Canvas::new(Point::new(3, 2)).unwrap();

        assert_eq!(canvas.size(), Point::new(3, 2));
        assert_eq!(canvas.pixels().len(), 6);
        assert!(canvas.pixels().iter().all(|c| *c == Color::TRANSPARENT));
    }

    #[test]
    fn test_rejects_non_positive_size() {
        for size in [
            Point::new(0, 5),
            Point::new(5, 0),
            Point::new(-1, 5),
            Point::new(0, 0),
        ] {
            assert!(matches!(
                Canvas::new(size),
                Err(ZoneError::InvalidSize(s)) if s == size
            ));
        }
    }

    #[test]
    fn test_rejects_unallocatable_size() {
        let size = Point::new(i32::MAX, i32::MAX);
        assert!(matches!(
            Canvas::new(size),
            Err(ZoneError::CanvasTooLarge(s)) if s == size
        ));
    }

    #[test]
    fn test_byte_size() {
        assert_eq!(Canvas::byte_size(Point::new(3, 2)), 24);
        assert_eq!(Canvas::byte_size(Point::new(-3, 2)), 0);
        assert_eq!(Canvas::byte_size(Point::new(i32::MAX, i32::MAX)), u64::MAX);
    }

    #[test]
    fn test_set_and_get() {
        let mut canvas = Canvas::new(Point::new(4, 3)).unwrap();
        let red = Color::new(255, 0, 0, 255);

        assert!(canvas.set(Point::new(3, 2), red));
        assert_eq!(canvas.get(Point::new(3, 2)), Some(red));
        assert_eq!(canvas.get(Point::new(2, 3)), None);
    }

    #[test]
    fn test_set_out_of_bounds() {
        let mut canvas = Canvas::new(Point::new(2, 2)).unwrap();
        let red = Color::new(255, 0, 0, 255);

        assert!(!canvas.set(Point::new(2, 0), red));
        assert!(!canvas.set(Point::new(0, 2), red));
        assert!(!canvas.set(Point::new(-1, 0), red));
        assert!(canvas.pixels().iter().all(|c| *c == Color::TRANSPARENT));
    }

    #[test]
    fn test_to_image_layout() {
        let mut canvas = Canvas::new(Point::new(3, 2)).unwrap();
        canvas.set(Point::new(2, 1), Color::new(1, 2, 3, 4));

        let img = canvas.to_image();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(2, 1).0, [1, 2, 3, 4]);
        assert_eq!(img.get_pixel(1, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_load_image_skips_transparent_pixels() {
        let mut canvas = Canvas::new(Point::new(2, 2)).unwrap();
        let blue = Color::new(0, 0, 255, 255);
        canvas.set(Point::new(0, 0), blue);

        let mut source = RgbaImage::new(2, 2);
        source.put_pixel(0, 0, image::Rgba([9, 9, 9, 0]));
        source.put_pixel(1, 1, image::Rgba([10, 20, 30, 128]));

        canvas.load_image(&DynamicImage::ImageRgba8(source)).unwrap();

        assert_eq!(canvas.get(Point::new(0, 0)), Some(blue));
        assert_eq!(canvas.get(Point::new(1, 1)), Some(Color::new(10, 20, 30, 128)));
        assert_eq!(canvas.get(Point::new(1, 0)), Some(Color::TRANSPARENT));
    }

    #[test]
    fn test_load_smaller_image() {
        let mut canvas = Canvas::new(Point::new(4, 4)).unwrap();
        let source = RgbaImage::from_pixel(2, 1, image::Rgba([5, 5, 5, 255]));

        canvas.load_image(&DynamicImage::ImageRgba8(source)).unwrap();

        assert_eq!(canvas.get(Point::new(1, 0)), Some(Color::new(5, 5, 5, 255)));
        assert_eq!(canvas.get(Point::new(2, 0)), Some(Color::TRANSPARENT));
        assert_eq!(canvas.get(Point::new(0, 1)), Some(Color::TRANSPARENT));
    }

    #[test]
    fn test_load_image_rejects_other_color_models() {
        let mut canvas = Canvas::new(Point::new(2, 2)).unwrap();
        let rgb = DynamicImage::ImageRgb8(image::RgbImage::new(2, 2));

        assert!(matches!(
            canvas.load_image(&rgb),
            Err(ZoneError::UnsupportedColorModel)
        ));
    }

    #[test]
    fn test_load_image_rejects_larger_image() {
        let mut canvas = Canvas::new(Point::new(2, 2)).unwrap();
        let wide = DynamicImage::ImageRgba8(RgbaImage::new(3, 1));
        let tall = DynamicImage::ImageRgba8(RgbaImage::new(1, 3));

        assert!(matches!(
            canvas.load_image(&wide),
            Err(ZoneError::ImageTooLarge { width: 3, height: 1, .. })
        ));
        assert!(matches!(
            canvas.load_image(&tall),
            Err(ZoneError::ImageTooLarge { width: 1, height: 3, .. })
        ));
    }
}
