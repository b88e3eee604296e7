
// Layouts of the files written by output.rs

pub const RESULTS_FILENAME: &str = "results.csv";

pub const RESULT_COLUMNS: [&str; 7] = [
    "Image name",
    "ROI name",
    "ROI volume (µm3)",
    "Hoechst total volume (µm3)",
    "Hoechst estimated nb",
    "KI67 total volume (µm3)",
    "KI67 estimated nb",
];

// Channel order of the overlay hyperstack.
pub const OVERLAY_CHANNELS: [&str; 4] = ["KI67 objects", "Hoechst objects", "KI67", "Hoechst"];

pub const OBJECT_INTENSITY: f32 = 255.0;
