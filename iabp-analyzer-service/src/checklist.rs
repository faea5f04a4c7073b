use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ChecklistItem {
    pub id: &'static str,
    pub description: &'static str,
}

/// Bedside checks to confirm before acting on any analysis.
pub const SAFETY_CHECKLIST: [ChecklistItem; 6] = [
    ChecklistItem {
        id: "balloon_not_dormant",
        description: "Balloon is NOT dormant (must cycle at least every 30 mins)",
    },
    ChecklistItem {
        id: "effective_augmentation",
        description: "PDAP is higher than Systolic (Effective Augmentation)",
    },
    ChecklistItem {
        id: "reduced_afterload",
        description: "BAEDP is lower than PAEDP (Reduced Afterload)",
    },
    ChecklistItem {
        id: "no_helium_line_blood",
        description: "No blood observed in the helium drive line (Balloon Rupture)",
    },
    ChecklistItem {
        id: "peripheral_pulses",
        description: "Peripheral pulses present in the cannulated limb",
    },
    ChecklistItem {
        id: "map_target",
        description: "MAP is > 65 mmHg or per institutional target",
    },
];
