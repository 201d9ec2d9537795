// SPDX-License-Identifier: GPL-3.0-only

/// Linear mapping between integer slider positions `0..=steps` and a
/// continuous value range `min..=max`.
///
/// `to_slider(to_value(s)) == s` for every position, values outside the
/// range are clamped before converting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderMap {
    steps: u32,
    min: f64,
    max: f64,
}

/// Global scale factor in quarter steps.
pub const SCALE: SliderMap = SliderMap::new(10, 0.5, 3.0);

impl SliderMap {
    pub const fn new(steps: u32, min: f64, max: f64) -> SliderMap {
        SliderMap { steps, min, max }
    }

    /// Brightness percent to a raw `0..=max` hardware value.
    pub const fn percent_of(max: f64) -> SliderMap {
        SliderMap::new(100, 0.0, max)
    }

    pub fn to_value(&self, slider: u32) -> f64 {
        if self.steps == 0 {
            return self.min;
        }
        let slider = slider.min(self.steps) as f64;
        self.min + (self.max - self.min) * slider / self.steps as f64
    }

    pub fn to_slider(&self, value: f64) -> u32 {
        let span = self.max - self.min;
        if self.steps == 0 || span == 0.0 || value.is_nan() {
            return 0;
        }
        let value = value.clamp(self.min.min(self.max), self.min.max(self.max));
        let slider = ((value - self.min) / span * self.steps as f64).round();
        (slider as u32).min(self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn brightness_boundaries() {
        const BRIGHTNESS: SliderMap = SliderMap::percent_of(1.0);
        assert_eq!(BRIGHTNESS.to_value(0), 0.0);
        assert_eq!(BRIGHTNESS.to_value(50), 0.5);
        assert_eq!(BRIGHTNESS.to_value(100), 1.0);
        assert_eq!(BRIGHTNESS.to_value(250), 1.0);
        assert_eq!(BRIGHTNESS.to_slider(-0.5), 0);
        assert_eq!(BRIGHTNESS.to_slider(0.504), 50);
        assert_eq!(BRIGHTNESS.to_slider(f64::NAN), 0);
    }

    #[test]
    fn scale_steps() {
        assert_eq!(SCALE.to_value(0), 0.5);
        assert_eq!(SCALE.to_value(2), 1.0);
        assert_eq!(SCALE.to_value(10), 3.0);
        assert_eq!(SCALE.to_slider(1.25), 3);
        assert_eq!(SCALE.to_slider(1.3), 3);
    }

    #[test]
    fn raw_backlight_range() {
        let map = SliderMap::percent_of(19393.0);
        assert_eq!(map.to_value(100).round() as u32, 19393);
        assert_eq!(map.to_slider(9696.0), 50);
        assert_eq!(map.to_slider(map.to_value(1).round()), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 512, ..ProptestConfig::default() })]

        #[test]
        fn slider_round_trip(
            steps in 1u32..2000,
            min in -100.0f64..100.0,
            span in 0.001f64..50000.0,
            pos in 0u32..2000,
        ) {
            let map = SliderMap::new(steps, min, min + span);
            let pos = pos.min(steps);
            let back = map.to_slider(map.to_value(pos));
            prop_assert!(back.abs_diff(pos) <= 1, "{} -> {}", pos, back);
        }

        #[test]
        fn integer_ranges_round_trip_exactly(steps in 1u32..1000, max in 1u32..100_000, pos in 0u32..1000) {
            let map = SliderMap::new(steps, 0.0, max as f64);
            let pos = pos.min(steps);
            prop_assert_eq!(map.to_slider(map.to_value(pos)), pos);
        }
    }
}
