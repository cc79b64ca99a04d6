/// Number of bytes per RGB8 pixel.
pub const BYTES_PER_PIXEL: usize = 3;

/// A packed RGB8 image (no row padding) as decoded from or sent to a video
/// stream.
#[derive(Clone, PartialEq, Eq)]
pub struct RgbFrame {
    /// width in pixels
    pub width: u32,
    /// height in pixels
    pub height: u32,
    /// raw image data, row-major, `width * 3` bytes per row
    image_data: Vec<u8>,
}

impl RgbFrame {
    /// Move a `Vec<u8>` buffer as the backing store for a frame.
    ///
    /// Returns None if the buffer length does not match the image size
    /// exactly.
    pub fn new(width: u32, height: u32, image_data: Vec<u8>) -> Option<Self> {
        if image_data.len() != buffer_size(width, height) {
            return None;
        }
        Some(Self {
            width,
            height,
            image_data,
        })
    }

    /// Allocate a black frame.
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            image_data: vec![0u8; buffer_size(width, height)],
        }
    }

    /// Allocate a frame filled with a single color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let image_data = rgb
            .iter()
            .copied()
            .cycle()
            .take(buffer_size(width, height))
            .collect();
        Self {
            width,
            height,
            image_data,
        }
    }

    /// number of bytes in an image row
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn image_data(&self) -> &[u8] {
        &self.image_data
    }

    pub fn image_data_mut(&mut self) -> &mut [u8] {
        &mut self.image_data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.image_data
    }

    /// Return the pixel at `(x, y)`, or None if outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
        Some([
            self.image_data[i],
            self.image_data[i + 1],
            self.image_data[i + 2],
        ])
    }
}

/// Size in bytes of a packed RGB8 image.
pub fn buffer_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

fn _test_rgb_frame_is_send() {
    // Compile-time test to ensure RgbFrame implements Send trait.
    fn implements<T: Send>() {}
    implements::<RgbFrame>();
}

impl std::fmt::Debug for RgbFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "RgbFrame {{ {}x{} }}", self.width, self.height)
    }
}
