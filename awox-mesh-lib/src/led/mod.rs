pub mod led_color;
pub mod light;
pub mod plug;
