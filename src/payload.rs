use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SdError};

/// Request body for `/sdapi/v1/txt2img` and `/sdapi/v1/img2img`.
///
/// Every field the WebUI understands is present with its documented default,
/// so the serialized payload is always complete. Fields can be set through
/// the typed builder methods or by name with [`set`](Self::set), which
/// rejects names outside the schema.
///
/// # Example
/// ```
/// use sdapi_rs::GenerationPayload;
/// use serde_json::json;
///
/// let mut payload = GenerationPayload::new("a lighthouse at dusk")
///     .negative("blurry")
///     .size(768, 512)
///     .steps(30);
/// payload.set("restore_faces", json!(true)).unwrap();
/// assert!(payload.set("stepz", json!(10)).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationPayload {
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: i64,
    pub subseed: i64,
    pub subseed_strength: f64,
    pub seed_resize_from_h: i64,
    pub seed_resize_from_w: i64,
    pub batch_size: u32,
    pub n_iter: u32,
    pub steps: u32,
    pub clip_skip: Option<u32>,
    pub width: u32,
    pub height: u32,
    pub sampler_name: String,
    pub hr_sampler_name: Option<String>,
    pub eta: Option<f64>,
    pub cfg_scale: f64,
    pub cfg_end: Option<f64>,
    pub diffusers_guidance_rescale: f64,
    pub pag_scale: Option<f64>,
    pub pag_adaptive: Option<f64>,
    pub styles: Vec<String>,
    pub tiling: bool,
    pub vae_type: Option<String>,
    pub hidiffusion: Option<bool>,
    pub restore_faces: bool,
    pub do_not_reload_embeddings: bool,
    pub enhance_prompt: bool,

    // detailer
    pub detailer_enabled: bool,
    pub detailer_prompt: String,
    pub detailer_negative: String,
    pub detailer_steps: u32,
    pub detailer_strength: f64,

    // hdr corrections
    pub hdr_mode: Option<u32>,
    pub hdr_brightness: f64,
    pub hdr_color: f64,
    pub hdr_sharpen: f64,
    pub hdr_clamp: bool,
    pub hdr_boundary: f64,
    pub hdr_threshold: f64,
    pub hdr_maximize: bool,
    pub hdr_max_center: f64,
    /// Spelled the way the server spells it.
    pub hdr_max_boundry: f64,
    pub hdr_color_picker: Option<String>,
    pub hdr_tint_ratio: f64,

    // img2img
    pub init_images: Vec<String>,
    pub resize_mode: u32,
    pub resize_name: Option<String>,
    pub resize_context: Option<String>,
    pub denoising_strength: Option<f64>,
    pub image_cfg_scale: Option<f64>,
    pub initial_noise_multiplier: f64,
    pub scale_by: f64,
    pub selected_scale_tab: Option<u32>,
    pub mask: Option<String>,
    pub latent_mask: Option<String>,
    pub mask_for_overlay: Option<String>,
    pub mask_blur: u32,
    pub paste_to: Option<Value>,
    pub inpainting_fill: u32,
    pub inpaint_full_res: bool,
    pub inpaint_full_res_padding: u32,
    pub inpainting_mask_invert: u32,
    pub overlay_images: Vec<String>,

    // hires fix
    pub enable_hr: bool,
    pub firstphase_width: u32,
    pub firstphase_height: u32,
    pub hr_scale: f64,
    pub hr_force: bool,
    pub hr_resize_mode: u32,
    pub hr_resize_context: Option<String>,
    pub hr_upscaler: Option<String>,
    pub hr_second_pass_steps: u32,
    pub hr_resize_x: u32,
    pub hr_resize_y: u32,
    pub hr_denoising_strength: Option<f64>,

    // refiner
    pub refiner_steps: Option<u32>,
    pub refiner_start: Option<f64>,
    pub refiner_prompt: Option<String>,
    pub refiner_negative: Option<String>,
    pub hr_refiner_start: Option<f64>,

    pub do_not_save_samples: bool,
    pub do_not_save_grid: bool,
    pub script_name: String,
    pub script_args: Vec<Value>,
    pub override_settings: Map<String, Value>,
    pub override_settings_restore_afterwards: bool,
    pub alwayson_scripts: Map<String, Value>,
    pub ip_adapter: Option<Value>,
    pub face: Option<Value>,
    pub extra: Option<Value>,
    pub checkpoint: Option<String>,
    pub vae: Option<String>,
}

impl Default for GenerationPayload {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            seed: -1,
            subseed: -1,
            subseed_strength: 0.0,
            seed_resize_from_h: 0,
            seed_resize_from_w: 0,
            batch_size: 1,
            n_iter: 1,
            steps: 20,
            clip_skip: None,
            width: 512,
            height: 512,
            sampler_name: "Euler a".to_string(),
            hr_sampler_name: None,
            eta: None,
            cfg_scale: 7.0,
            cfg_end: None,
            diffusers_guidance_rescale: 0.0,
            pag_scale: None,
            pag_adaptive: None,
            styles: Vec::new(),
            tiling: false,
            vae_type: None,
            hidiffusion: None,
            restore_faces: false,
            do_not_reload_embeddings: false,
            enhance_prompt: false,
            detailer_enabled: false,
            detailer_prompt: String::new(),
            detailer_negative: String::new(),
            detailer_steps: 0,
            detailer_strength: 0.0,
            hdr_mode: None,
            hdr_brightness: 1.0,
            hdr_color: 1.0,
            hdr_sharpen: 1.0,
            hdr_clamp: true,
            hdr_boundary: 0.0,
            hdr_threshold: 1.0,
            hdr_maximize: false,
            hdr_max_center: 0.0,
            hdr_max_boundry: 0.0,
            hdr_color_picker: None,
            hdr_tint_ratio: 0.0,
            init_images: Vec::new(),
            resize_mode: 0,
            resize_name: None,
            resize_context: None,
            denoising_strength: None,
            image_cfg_scale: None,
            initial_noise_multiplier: 1.0,
            scale_by: 1.0,
            selected_scale_tab: None,
            mask: None,
            latent_mask: None,
            mask_for_overlay: None,
            mask_blur: 4,
            paste_to: None,
            inpainting_fill: 0,
            inpaint_full_res: true,
            inpaint_full_res_padding: 0,
            inpainting_mask_invert: 0,
            overlay_images: Vec::new(),
            enable_hr: false,
            firstphase_width: 0,
            firstphase_height: 0,
            hr_scale: 2.0,
            hr_force: false,
            hr_resize_mode: 0,
            hr_resize_context: None,
            hr_upscaler: None,
            hr_second_pass_steps: 0,
            hr_resize_x: 0,
            hr_resize_y: 0,
            hr_denoising_strength: None,
            refiner_steps: None,
            refiner_start: None,
            refiner_prompt: None,
            refiner_negative: None,
            hr_refiner_start: None,
            do_not_save_samples: false,
            do_not_save_grid: false,
            script_name: String::new(),
            script_args: Vec::new(),
            override_settings: Map::new(),
            override_settings_restore_afterwards: true,
            alwayson_scripts: Map::new(),
            ip_adapter: None,
            face: None,
            extra: None,
            checkpoint: None,
            vae: None,
        }
    }
}

impl GenerationPayload {
    /// Payload with the given prompt and defaults for everything else
    /// (512x512, 20 steps, cfg 7, "Euler a", random seed).
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn negative(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = prompt.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn cfg_scale(mut self, cfg: f64) -> Self {
        self.cfg_scale = cfg;
        self
    }

    /// Sampler display name as listed by `/sdapi/v1/samplers` (e.g. "DPM++ 2M").
    pub fn sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler_name = sampler.into();
        self
    }

    /// Fixed seed. -1 (the default) lets the server pick one.
    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.styles.push(style.into());
        self
    }

    /// Add a base64-encoded source image (img2img).
    pub fn init_image(mut self, base64: impl Into<String>) -> Self {
        self.init_images.push(base64.into());
        self
    }

    pub fn denoising_strength(mut self, strength: f64) -> Self {
        self.denoising_strength = Some(strength);
        self
    }

    pub fn checkpoint(mut self, name: impl Into<String>) -> Self {
        self.checkpoint = Some(name.into());
        self
    }

    /// Override one server option for this generation only.
    pub fn override_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.override_settings.insert(key.into(), value);
        self
    }

    /// Set a field by its wire name.
    ///
    /// Fails with [`SdError::UnknownField`] if the name is not part of the
    /// payload, or with [`SdError::Json`] if the value has the wrong type.
    /// On failure the payload is left unchanged.
    pub fn set(&mut self, field: &str, value: Value) -> Result<()> {
        let mut fields = self.to_map()?;
        match fields.get_mut(field) {
            Some(slot) => *slot = value,
            None => return Err(SdError::UnknownField(field.to_string())),
        }
        *self = serde_json::from_value(Value::Object(fields))?;
        Ok(())
    }

    /// Set several fields by name. Stops at the first invalid one; fields set
    /// before it keep their new values.
    pub fn update<I, K>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        for (field, value) in fields {
            self.set(field.as_ref(), value)?;
        }
        Ok(())
    }

    /// Read a field by its wire name.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.to_map().ok()?.remove(field)
    }

    /// The complete JSON body.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn to_map(&self) -> Result<Map<String, Value>> {
        match self.to_value()? {
            Value::Object(map) => Ok(map),
            _ => Err(SdError::InvalidRequest("payload is not a JSON object".into())),
        }
    }
}
