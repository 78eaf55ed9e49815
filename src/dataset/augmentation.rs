//! Data Augmentation Module
//!
//! Random geometric transforms applied to training images after they are
//! resized to the target resolution: rotation, width/height shift, shear,
//! zoom and horizontal flip. The geometric parts are composed into a single
//! affine map and sampled bilinearly, with edge pixels repeated outside the
//! source ("nearest" fill).
//!
//! # Determinism
//!
//! Validation images are never augmented. Training augmentation draws a fresh
//! seed per batch, so two training runs see different augmented pixels even
//! with the same split seed.

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{PipelineError, Result};

/// Bounds for the random transforms
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Maximum rotation angle in degrees (applies ±rotation_range)
    pub rotation_range: f32,
    /// Horizontal shift as a fraction of the width (±)
    pub width_shift_range: f32,
    /// Vertical shift as a fraction of the height (±)
    pub height_shift_range: f32,
    /// Maximum shear angle in degrees (±)
    pub shear_range: f32,
    /// Zoom factor drawn from [1 - zoom_range, 1 + zoom_range] per axis
    pub zoom_range: f32,
    /// Mirror half of the images left-to-right
    pub horizontal_flip: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_range: 40.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            shear_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let bounds = [
            ("rotation_range", self.rotation_range, 360.0),
            ("width_shift_range", self.width_shift_range, 1.0),
            ("height_shift_range", self.height_shift_range, 1.0),
            ("shear_range", self.shear_range, 90.0),
            ("zoom_range", self.zoom_range, 0.99),
        ];
        for (name, value, max) in bounds {
            if !(value.is_finite() && (0.0..=max).contains(&value)) {
                return Err(PipelineError::Configuration(format!(
                    "augmentation_params.{} must be in [0, {}], got {}",
                    name, max, value
                )));
            }
        }
        Ok(())
    }
}

/// One draw of transform parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineParams {
    pub theta_degrees: f32,
    pub shift_x: f32,
    pub shift_y: f32,
    pub shear_degrees: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    pub flip: bool,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            theta_degrees: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            shear_degrees: 0.0,
            zoom_x: 1.0,
            zoom_y: 1.0,
            flip: false,
        }
    }
}

/// Resizes, optionally augments, and rescales images into CHW float data
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    /// Target (height, width)
    target_size: (u32, u32),
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, target_size: (usize, usize)) -> Self {
        Self {
            config,
            target_size: (target_size.0 as u32, target_size.1 as u32),
        }
    }

    /// Rescale-only pipeline
    pub fn no_augmentation(target_size: (usize, usize)) -> Self {
        Self::new(AugmentationConfig::none(), target_size)
    }

    /// Draw transform parameters within the configured bounds
    pub fn sample_params(&self, rng: &mut ChaCha8Rng) -> AffineParams {
        let (height, width) = self.target_size;
        let c = &self.config;

        let theta_degrees = symmetric(rng, c.rotation_range);
        let shift_x = symmetric(rng, c.width_shift_range) * width as f32;
        let shift_y = symmetric(rng, c.height_shift_range) * height as f32;
        let shear_degrees = symmetric(rng, c.shear_range);
        let (zoom_x, zoom_y) = if c.zoom_range > 0.0 {
            (
                rng.gen_range(1.0 - c.zoom_range..=1.0 + c.zoom_range),
                rng.gen_range(1.0 - c.zoom_range..=1.0 + c.zoom_range),
            )
        } else {
            (1.0, 1.0)
        };
        let flip = c.horizontal_flip && rng.gen_bool(0.5);

        AffineParams {
            theta_degrees,
            shift_x,
            shift_y,
            shear_degrees,
            zoom_x,
            zoom_y,
            flip,
        }
    }

    /// Apply one random transform to an image
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let params = self.sample_params(rng);
        apply_affine(img, &params)
    }

    /// Resize to the target resolution with bilinear filtering
    pub fn resize(&self, img: &DynamicImage) -> RgbImage {
        let (height, width) = self.target_size;
        image::imageops::resize(&img.to_rgb8(), width, height, FilterType::Triangle)
    }

    /// Convert image to CHW float tensor data rescaled by 1/255
    pub fn to_tensor_data(&self, img: &RgbImage) -> Vec<f32> {
        let (width, height) = img.dimensions();
        let mut data = Vec::with_capacity(3 * height as usize * width as usize);

        for c in 0..3 {
            for y in 0..height {
                for x in 0..width {
                    data.push(img.get_pixel(x, y)[c] as f32 / 255.0);
                }
            }
        }

        data
    }

    /// Full pipeline: resize, augment when an rng is given, rescale
    pub fn preprocess(&self, img: &DynamicImage, rng: Option<&mut ChaCha8Rng>) -> Vec<f32> {
        let mut resized = self.resize(img);

        if let Some(rng) = rng {
            resized = self.augment(&resized, rng);
        }

        self.to_tensor_data(&resized)
    }
}

fn symmetric(rng: &mut ChaCha8Rng, bound: f32) -> f32 {
    if bound > 0.0 {
        rng.gen_range(-bound..=bound)
    } else {
        0.0
    }
}

/// Map every output pixel back into the source and sample it
pub fn apply_affine(img: &RgbImage, params: &AffineParams) -> RgbImage {
    let (width, height) = img.dimensions();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;

    let theta = params.theta_degrees.to_radians();
    let shear = params.shear_degrees.to_radians();
    let (sin_t, cos_t) = theta.sin_cos();

    // rotation · shear · zoom, applied to centred output coordinates
    let a = cos_t * params.zoom_x;
    let b = (-sin_t * shear.cos() - cos_t * shear.sin()) * params.zoom_y;
    let c = sin_t * params.zoom_x;
    let d = (cos_t * shear.cos() - sin_t * shear.sin()) * params.zoom_y;

    let mut output = ImageBuffer::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let out_x = if params.flip {
                (width - 1 - x) as f32
            } else {
                x as f32
            };
            let dx = out_x - cx;
            let dy = y as f32 - cy;

            let src_x = a * dx + b * dy + cx + params.shift_x;
            let src_y = c * dx + d * dy + cy + params.shift_y;

            output.put_pixel(x, y, bilinear_sample(img, src_x, src_y));
        }
    }

    output
}

/// Sample a pixel using bilinear interpolation, clamping to the nearest edge
fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;

        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}
