use image::{GenericImageView, ImageBuffer, Pixel};
use imageproc::definitions::Image;

/// Nearest-neighbor resampling.
///
/// Destination pixel `(x, y)` copies source pixel
/// `(floor(x * src_width / dst_width), floor(y * src_height / dst_height))`,
/// so resizing to the current size is the identity and every channel of the
/// source pixel is carried over unchanged.
pub trait NearestResize {
    type Output;

    /// Resizes to `new_width x new_height`.
    ///
    /// Returns an empty image if either target dimension is zero.
    fn resize_nearest(&self, new_width: u32, new_height: u32) -> Self::Output;
}

impl<P> NearestResize for Image<P>
where
    P: Pixel,
{
    type Output = Self;

    fn resize_nearest(&self, new_width: u32, new_height: u32) -> Self {
        resize_nearest(self, new_width, new_height)
    }
}

/// Source index for destination index `dst` along one axis.
#[inline]
const fn source_index(dst: u32, src_size: u32, dst_size: u32) -> u32 {
    ((dst as u64 * src_size as u64) / dst_size as u64) as u32
}

/// Nearest-neighbor resize of any image view.
pub fn resize_nearest<I, P>(src: &I, new_width: u32, new_height: u32) -> Image<P>
where
    I: GenericImageView<Pixel = P>,
    P: Pixel,
{
    let (src_width, src_height) = src.dimensions();
    if src_width == 0 || src_height == 0 {
        return ImageBuffer::new(new_width, new_height);
    }

    let x_map: Vec<u32> = (0..new_width)
        .map(|x| source_index(x, src_width, new_width))
        .collect();

    ImageBuffer::from_fn(new_width, new_height, |x, y| {
        let sy = source_index(y, src_height, new_height);
        src.get_pixel(x_map[x as usize], sy)
    })
}
