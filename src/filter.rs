/// One-pole smoothing over consecutive samples.
///
/// Each output blends the new sample with the previous *input* sample:
/// `out = val * k + prev * (1 - k)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filter {
    koeff: f32,
    prev: f32,
}

impl Filter {
    pub fn new(koeff: f32, init: f32) -> Self {
        Self { koeff, prev: init }
    }

    pub fn filter(&mut self, val: f32) -> f32 {
        let prev = self.prev;
        self.prev = val;
        val * self.koeff + prev * (1.0 - self.koeff)
    }

    pub fn reset(&mut self, init: f32) {
        self.prev = init;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blends_with_previous_input() {
        let mut filter = Filter::new(0.5, 10.0);
        assert_eq!(filter.filter(20.0), 15.0);
        // Previous input was 20, not the previous output 15.
        assert_eq!(filter.filter(20.0), 20.0);
    }

    #[test]
    fn test_unity_koeff_passes_through() {
        let mut filter = Filter::new(1.0, 3.0);
        assert_eq!(filter.filter(7.0), 7.0);
        filter.reset(0.0);
        assert_eq!(filter.filter(2.0), 2.0);
    }
}
