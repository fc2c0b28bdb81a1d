const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Pitch name for a MIDI note number; 60 is `C4`.
pub fn note_string(note_num: i32) -> String {
    let name = NOTE_NAMES[note_num.rem_euclid(12) as usize];
    let octave = note_num.div_euclid(12) - 1;
    format!("{}{}", name, octave)
}
