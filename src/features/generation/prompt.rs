//! 提示词组装。
//!
//! 上游渲染器对分辨率与构图约束的遵循并不可靠，因此尺寸要求在
//! 指令头部与结尾各写一遍；这种冗余是刻意的。

/// 组装所需的结构化参数。
#[derive(Debug, Clone, Default)]
pub struct PromptSettings {
    pub temperature: Option<f64>,
    pub seed: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// 欧几里得算法求最大公约数。
fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// 以最大公约数约简为 `W:H` 形式的比例字符串。
pub fn simplify_ratio(width: u32, height: u32) -> String {
    if width == 0 || height == 0 {
        return format!("{width}:{height}");
    }
    let d = gcd(width, height);
    format!("{}:{}", width / d, height / d)
}

/// 常见比例的人类可读标签；未收录的比例不加标签。
pub fn ratio_label(ratio: &str) -> Option<&'static str> {
    match ratio {
        "16:9" => Some("cinematic"),
        "9:16" => Some("mobile"),
        "4:3" => Some("classic"),
        "3:4" => Some("portrait"),
        "21:9" => Some("ultra-wide"),
        "1:1" => Some("square"),
        _ => None,
    }
}

/// 按温度选择创作风格指引；未提供温度则不加指引。
fn creative_guidance(temperature: f64) -> &'static str {
    if temperature <= 0.5 {
        "Render with precise, photographic fidelity: accurate lighting, true-to-life textures and faithful composition."
    } else if temperature <= 1.0 {
        "Render in a balanced, natural style with harmonious colors and believable composition."
    } else if temperature <= 1.5 {
        "Render with artistic, stylized interpretation: expressive colors, bold shapes and creative composition."
    } else {
        "Render with surreal, experimental freedom: dreamlike imagery, unexpected juxtapositions and unconventional forms."
    }
}

fn ratio_clause(width: u32, height: u32) -> String {
    let ratio = simplify_ratio(width, height);
    match ratio_label(&ratio) {
        Some(label) => format!("aspect ratio {ratio}, {label}"),
        None => format!("aspect ratio {ratio}"),
    }
}

/// 正文 = 用户文本 + 创作指引 + 风格参考（seed）。
fn enhanced_body(text: &str, settings: &PromptSettings) -> String {
    let mut body = text.trim().to_string();
    if let Some(t) = settings.temperature {
        body.push_str("\n\n");
        body.push_str(creative_guidance(t));
    }
    if let Some(seed) = settings.seed {
        // 上游没有原生 seed 参数，折叠成文字形式的风格参考提示。
        body.push_str(&format!(
            "\n\nStyle reference code: {seed}. Keep the visual style consistent with this reference."
        ));
    }
    body
}

fn dimension_directive(width: u32, height: u32) -> String {
    format!(
        "IMAGE GENERATION DIRECTIVE:\n\
         - Output resolution: exactly {width}×{height} pixels ({})\n\
         - The artwork must fill the entire canvas edge-to-edge\n\
         - No borders, frames, margins, padding or letterboxing of any kind",
        ratio_clause(width, height)
    )
}

fn critical_requirements(width: u32, height: u32) -> String {
    format!(
        "CRITICAL REQUIREMENTS:\n\
         - The final image must measure exactly {width}×{height} pixels\n\
         - Content reaches every edge of the canvas; no border or frame may remain"
    )
}

/// 生成请求的最终指令文本。
pub fn build_generation_prompt(text: &str, settings: &PromptSettings) -> String {
    let body = enhanced_body(text, settings);
    match (settings.width, settings.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => {
            format!(
                "{}\n\n{}\n\n{}",
                dimension_directive(w, h),
                body,
                critical_requirements(w, h)
            )
        }
        _ => body,
    }
}

/// 编辑请求的指令模板，与生成模板相互独立。
///
/// 提供蒙版时，明确只允许修改蒙版白色区域并逐像素保留其余内容。
pub fn build_edit_prompt(instruction: &str, has_mask: bool, settings: &PromptSettings) -> String {
    let mut out = String::from("IMAGE EDIT INSTRUCTION:\n");
    out.push_str(&enhanced_body(instruction, settings));
    out.push_str("\n\n");
    if has_mask {
        out.push_str(
            "A mask image is attached after the original. Apply the requested change ONLY to \
             the masked (white) pixels; every pixel outside the mask must be preserved exactly \
             as in the original image.",
        );
    } else {
        out.push_str(
            "Apply the requested change while preserving the original composition, identity \
             and every detail not covered by the instruction.",
        );
    }
    if let (Some(w), Some(h)) = (settings.width, settings.height)
        && w > 0
        && h > 0
    {
        out.push_str("\n\n");
        out.push_str(&critical_requirements(w, h));
    }
    out
}

/// 分割请求的指令文本：要求上游仅以 JSON 数组应答。
pub fn build_segmentation_prompt(query: Option<&str>) -> String {
    let target = match query {
        Some(q) if !q.trim().is_empty() => q.trim().to_string(),
        _ => "all clearly distinguishable objects".to_string(),
    };
    format!(
        "Analyze the attached image and segment {target}. Respond ONLY with a JSON array. \
         Each element must be an object with exactly these keys: \"label\" (string), \
         \"box\" (array [x, y, w, h] in pixel coordinates) and \"mask\" \
         (base64-encoded PNG of the binary segmentation mask). \
         Do not add any explanation or markdown fences."
    )
}
