use iabp_session::SessionParameters;

pub const EXTRACTION_MAX_TOKENS: u32 = 1000;
pub const ANALYSIS_MAX_TOKENS: u32 = 1500;

pub const DISCLAIMER: &str = "This tool is for educational and clinical decision support purposes only. \
Final clinical decisions must be made by qualified medical personnel.";

pub fn extraction_prompt() -> String {
    format!(
        "Extract clinical values from this IABP monitor.
        Return ONLY a JSON object with these keys:
        {}.
        If a value is not visible, leave it as an empty string.",
        SessionParameters::KEYS.join(", ")
    )
}

pub fn analysis_prompt(parameters: &SessionParameters) -> String {
    format!(
        "As a cardiology expert, analyze these IABP parameters:
        {}

        Provide a structured report including:
        1. Hemodynamic Assessment (Augmentation effectiveness)
        2. Timing Evaluation (Compare PDAP/Systolic and BAEDP/PAEDP)
        3. Potential Optimization suggestions
        4. Immediate Safety Concerns",
        parameters.to_pretty_json()
    )
}
