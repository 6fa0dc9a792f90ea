//! Separable gaussian blur over premultiplied RGBA8.
//!
//! Weights are Q16 fixed point so the result is the same on every platform.

/// Blur `data` (premultiplied RGBA8, `width * height` pixels) in place.
///
/// Samples past the edges repeat the edge pixel. Sigma values that are not
/// positive leave the buffer unchanged.
pub fn gaussian_blur(data: &mut [u8], width: u32, height: u32, sigma: f64) {
    if !(sigma.is_finite() && sigma > 0.0) || width == 0 || height == 0 {
        return;
    }
    if data.len() != width as usize * height as usize * 4 {
        log::warn!("Blur buffer size does not match {width}x{height}; skipping");
        return;
    }
    let kernel = kernel_q16(sigma);
    if kernel.len() == 1 {
        return;
    }
    let mut tmp = vec![0u8; data.len()];
    horizontal_pass(data, &mut tmp, width as usize, height as usize, &kernel);
    vertical_pass(&tmp, data, width as usize, height as usize, &kernel);
}

/// Kernel radius covering three standard deviations.
pub fn kernel_radius(sigma: f64) -> u32 {
    if sigma.is_finite() && sigma > 0.0 {
        (sigma * 3.0).ceil() as u32
    } else {
        0
    }
}

fn kernel_q16(sigma: f64) -> Vec<u32> {
    let radius = kernel_radius(sigma) as i32;
    if radius == 0 {
        return vec![1 << 16];
    }
    let denom = 2.0 * sigma * sigma;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|i| (-(i as f64).powi(2) / denom).exp())
        .collect();
    let sum: f64 = weights.iter().sum();

    let mut kernel: Vec<u32> = weights
        .iter()
        .map(|w| ((w / sum) * 65536.0).round().clamp(0.0, 65536.0) as u32)
        .collect();
    // Put the rounding error on the center tap so the weights sum to one.
    let total: i64 = kernel.iter().map(|&w| w as i64).sum();
    let mid = kernel.len() / 2;
    kernel[mid] = (kernel[mid] as i64 + 65536 - total).clamp(0, 65536) as u32;
    kernel
}

#[inline]
fn q16_to_u8(acc: u64) -> u8 {
    ((acc + (1 << 15)) >> 16).min(255) as u8
}

fn horizontal_pass(src: &[u8], dst: &mut [u8], w: usize, h: usize, kernel: &[u32]) {
    let radius = (kernel.len() / 2) as isize;
    for y in 0..h {
        let row = y * w * 4;
        for x in 0..w {
            let mut acc = [0u64; 4];
            for (ki, &kw) in kernel.iter().enumerate() {
                let sx = (x as isize + ki as isize - radius).clamp(0, w as isize - 1) as usize;
                let idx = row + sx * 4;
                for c in 0..4 {
                    acc[c] += kw as u64 * src[idx + c] as u64;
                }
            }
            let out = row + x * 4;
            for c in 0..4 {
                dst[out + c] = q16_to_u8(acc[c]);
            }
        }
    }
}

fn vertical_pass(src: &[u8], dst: &mut [u8], w: usize, h: usize, kernel: &[u32]) {
    let radius = (kernel.len() / 2) as isize;
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0u64; 4];
            for (ki, &kw) in kernel.iter().enumerate() {
                let sy = (y as isize + ki as isize - radius).clamp(0, h as isize - 1) as usize;
                let idx = (sy * w + x) * 4;
                for c in 0..4 {
                    acc[c] += kw as u64 * src[idx + c] as u64;
                }
            }
            let out = (y * w + x) * 4;
            for c in 0..4 {
                dst[out + c] = q16_to_u8(acc[c]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_sums_to_one() {
        for sigma in [0.4, 1.0, 2.5, 7.0] {
            let kernel = kernel_q16(sigma);
            assert_eq!(kernel.iter().map(|&w| w as u64).sum::<u64>(), 65536);
            assert_eq!(kernel.len() as u32, kernel_radius(sigma) * 2 + 1);
        }
    }

    #[test]
    fn test_uniform_buffer_unchanged() {
        let mut data = [40u8, 80, 120, 200].repeat(9 * 7);
        let before = data.clone();
        gaussian_blur(&mut data, 9, 7, 2.0);
        assert_eq!(data, before);
    }

    #[test]
    fn test_spreads_single_pixel() {
        let (w, h) = (21u32, 21u32);
        let mut data = vec![0u8; (w * h * 4) as usize];
        let center = ((10 * w + 10) * 4) as usize;
        data[center..center + 4].copy_from_slice(&[255, 255, 255, 255]);

        gaussian_blur(&mut data, w, h, 2.0);

        let alpha = |x: u32, y: u32| data[((y * w + x) * 4 + 3) as usize];
        assert!(alpha(10, 10) < 255);
        assert!(alpha(12, 10) > 0);
        assert_eq!(alpha(12, 10), alpha(8, 10));
        assert_eq!(alpha(10, 12), alpha(10, 8));
        assert_eq!(alpha(0, 0), 0);
    }

    #[test]
    fn test_zero_sigma_is_noop() {
        let mut data = vec![1, 2, 3, 4];
        gaussian_blur(&mut data, 1, 1, 0.0);
        assert_eq!(data, vec![1, 2, 3, 4]);
    }
}
