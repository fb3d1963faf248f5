//! Sony IRCC command catalog and the default FLIRC keymap.
//!
//! The FLIRC receiver is programmed to emit ordinary Linux keycodes, so the
//! default keymap is keyed by `input-event-codes.h` values.

/// Command name → Base64 IRCC code understood by Bravia sets.
pub const IRCC_CATALOG: &[(&str, &str)] = &[
    ("num1", "AAAAAQAAAAEAAAAAAw=="),
    ("num2", "AAAAAQAAAAEAAAABAw=="),
    ("num3", "AAAAAQAAAAEAAAACAw=="),
    ("num4", "AAAAAQAAAAEAAAADAw=="),
    ("num5", "AAAAAQAAAAEAAAAEAw=="),
    ("num6", "AAAAAQAAAAEAAAAFAw=="),
    ("num7", "AAAAAQAAAAEAAAAGAw=="),
    ("num8", "AAAAAQAAAAEAAAAHAw=="),
    ("num9", "AAAAAQAAAAEAAAAIAw=="),
    ("num0", "AAAAAQAAAAEAAAAJAw=="),
    ("up", "AAAAAQAAAAEAAAB0Aw=="),
    ("down", "AAAAAQAAAAEAAAB1Aw=="),
    ("left", "AAAAAQAAAAEAAAA0Aw=="),
    ("right", "AAAAAQAAAAEAAAAzAw=="),
    ("enter", "AAAAAQAAAAEAAABlAw=="),
    ("back", "AAAAAgAAAJcAAAAjAw=="),
    ("home", "AAAAAQAAAAEAAABgAw=="),
    ("mute", "AAAAAQAAAAEAAAAUAw=="),
    ("volumedown", "AAAAAQAAAAEAAAATAw=="),
    ("volumeup", "AAAAAQAAAAEAAAASAw=="),
    ("play", "AAAAAQAAAAEAAAANAw=="),
    ("stop", "AAAAAQAAAAEAAAAOAw=="),
    ("rewind", "AAAAAQAAAAEAAAA4Aw=="),
    ("fastforward", "AAAAAQAAAAEAAAA5Aw=="),
    ("next", "AAAAAQAAAAEAAAAXAw=="),
    ("previous", "AAAAAQAAAAEAAAAYAw=="),
    ("power", "AAAAAQAAAAEAAAAVAw=="),
    ("input", "AAAAAQAAAAEAAAAlAw=="),
    ("actionmenu", "AAAAAQAAAAEAAAA6Aw=="),
    ("netflix", "AAAAAQAAAAEAAAAMAw=="),
    ("youtube", "AAAAAQAAAAEAAABDAw=="),
    ("channelup", "AAAAAQAAAAEAAAA+Aw=="),
    ("channeldown", "AAAAAQAAAAEAAAA9Aw=="),
    ("hdmi1", "AAAAAQAAAAEAAABAAw=="),
    ("hdmi2", "AAAAAQAAAAEAAABBAw=="),
    // Color keys have no default keycode; bind them via the [mapping] table.
    ("red", "AAAAAgAAAJcAAAAlAw=="),
    ("green", "AAAAAgAAAJcAAAAmAw=="),
    ("yellow", "AAAAAgAAAJcAAAAnAw=="),
    ("blue", "AAAAAgAAAJcAAAAkAw=="),
];

/// Keycode → command name.
pub const DEFAULT_KEYMAP: &[(u16, &str)] = &[
    // Numbers
    (2, "num1"),
    (3, "num2"),
    (4, "num3"),
    (5, "num4"),
    (6, "num5"),
    (7, "num6"),
    (8, "num7"),
    (9, "num8"),
    (10, "num9"),
    (11, "num0"),
    // Navigation
    (103, "up"),
    (108, "down"),
    (105, "left"),
    (106, "right"),
    (96, "enter"),
    (28, "enter"),
    (1, "back"),
    (102, "home"),
    // Volume
    (113, "mute"),
    (114, "volumedown"),
    (115, "volumeup"),
    // Media
    (164, "play"),
    (166, "stop"),
    (168, "rewind"),
    (208, "fastforward"),
    (163, "next"),
    (165, "previous"),
    // System
    (44, "power"),
    (23, "input"),
    (30, "actionmenu"),
    (49, "netflix"),
    (25, "youtube"),
    // Channel
    (20, "channelup"),
    (47, "channeldown"),
    (17, "hdmi1"),
    (22, "hdmi2"),
];

/// Looks up a catalog entry by command name.
pub fn lookup(name: &str) -> Option<(&'static str, &'static str)> {
    IRCC_CATALOG
        .iter()
        .find(|(command, _)| *command == name)
        .copied()
}
