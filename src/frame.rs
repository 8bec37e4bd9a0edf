use crate::error::{CaptureError, CaptureResult};
use crate::geometry::{DesktopRect, DesktopVector};

pub const BYTES_PER_PIXEL: usize = 4;

/// A single captured frame of BGRA pixels.
///
/// `top_left` positions the frame in virtual-screen coordinates (relative
/// to the virtual-screen origin, so always non-negative on the primary
/// layout). `updated_region` is a frame-relative hint describing which part
/// changed since the previous frame; backends that do not track damage set
/// it to the full frame.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    width: i32,
    height: i32,
    pub top_left: DesktopVector,
    pub updated_region: DesktopRect,
    data: Vec<u8>,
}

impl Frame {
    /// Allocate a zeroed (black, fully transparent) frame.
    pub fn with_size(width: i32, height: i32) -> CaptureResult<Self> {
        if width <= 0 || height <= 0 {
            return Err(CaptureError::GrabRefused(format!(
                "invalid frame size {width}x{height}"
            )));
        }
        let byte_len = usize::try_from(width)
            .ok()
            .and_then(|w| usize::try_from(height).ok().map(|h| (w, h)))
            .and_then(|(w, h)| w.checked_mul(h))
            .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL))
            .ok_or(CaptureError::BufferOverflow)?;
        Ok(Self {
            width,
            height,
            top_left: DesktopVector::default(),
            updated_region: DesktopRect::from_xywh(0, 0, width, height),
            data: vec![0u8; byte_len],
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Row stride in bytes. Frames are always tightly packed.
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Bounds of the frame in the coordinate space of `top_left`.
    pub fn rect(&self) -> DesktopRect {
        DesktopRect::from_xywh(self.top_left.x, self.top_left.y, self.width, self.height)
    }

    pub fn as_bgra_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_bgra_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy out the sub-rectangle `region`, given in the same coordinate
    /// space as `top_left`. The result keeps that space: its `top_left` is
    /// the region origin. Fails when `region` reaches outside the frame.
    pub fn cropped(&self, region: DesktopRect) -> CaptureResult<Frame> {
        if region.is_empty() {
            return Err(CaptureError::GrabRefused(
                "crop region is empty".to_string(),
            ));
        }
        if !self.rect().contains_rect(region) {
            return Err(CaptureError::GrabRefused(format!(
                "crop region {region:?} is outside the frame {:?}",
                self.rect()
            )));
        }

        let mut out = Frame::with_size(region.width(), region.height())?;
        out.top_left = region.top_left();

        let src_stride = self.stride();
        let dst_stride = out.stride();
        let x_offset = (region.left() - self.top_left.x) as usize * BYTES_PER_PIXEL;
        let y_offset = (region.top() - self.top_left.y) as usize;
        let row_bytes = dst_stride;

        for row in 0..region.height() as usize {
            let src_start = (y_offset + row)
                .checked_mul(src_stride)
                .and_then(|offset| offset.checked_add(x_offset))
                .ok_or(CaptureError::BufferOverflow)?;
            let dst_start = row.checked_mul(dst_stride).ok_or(CaptureError::BufferOverflow)?;
            out.data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&self.data[src_start..src_start + row_bytes]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_gradient(width: i32, height: i32) -> Frame {
        let mut frame = Frame::with_size(width, height).unwrap();
        for (index, byte) in frame.as_mut_bgra_bytes().iter_mut().enumerate() {
            *byte = (index % 251) as u8;
        }
        frame
    }

    #[test]
    fn with_size_rejects_degenerate_dimensions() {
        assert!(Frame::with_size(0, 10).is_err());
        assert!(Frame::with_size(10, -1).is_err());
        let frame = Frame::with_size(1, 1).unwrap();
        assert_eq!(frame.as_bgra_bytes(), &[0, 0, 0, 0]);
    }

    #[test]
    fn updated_region_defaults_to_full_frame() {
        let frame = Frame::with_size(8, 4).unwrap();
        assert_eq!(frame.updated_region, DesktopRect::from_xywh(0, 0, 8, 4));
    }

    #[test]
    fn cropped_keeps_coordinate_space_and_pixels() {
        let mut frame = frame_with_gradient(16, 8);
        frame.top_left = DesktopVector::new(100, 50);

        let region = DesktopRect::from_xywh(104, 52, 4, 3);
        let cropped = frame.cropped(region).unwrap();

        assert_eq!(cropped.width(), 4);
        assert_eq!(cropped.height(), 3);
        assert_eq!(cropped.top_left, DesktopVector::new(104, 52));

        // Pixel (0, 0) of the crop is pixel (4, 2) of the source.
        let src_offset = 2 * frame.stride() + 4 * BYTES_PER_PIXEL;
        assert_eq!(
            &cropped.as_bgra_bytes()[..BYTES_PER_PIXEL],
            &frame.as_bgra_bytes()[src_offset..src_offset + BYTES_PER_PIXEL]
        );
    }

    #[test]
    fn cropped_rejects_regions_outside_the_frame() {
        let frame = frame_with_gradient(8, 8);
        assert!(frame.cropped(DesktopRect::from_xywh(4, 4, 8, 8)).is_err());
        assert!(frame.cropped(DesktopRect::default()).is_err());
    }
}
