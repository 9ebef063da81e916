//! GPIO pin abstractions
//!
//! The pattern generator only needs to route a pin to the PWM peripheral,
//! but pins are modelled fully (function, drive level, input level) so the
//! same trait serves for bring-up and diagnostics.

/// Function selected for a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinFunction {
    /// Digital input
    Input,
    /// Digital output
    Output,
    /// Alternate peripheral function (0-5 on BCM283x)
    Alt(u8),
}

/// A single GPIO pin
///
/// Implementations should handle the actual register manipulation for the
/// specific SoC.
pub trait GpioPin {
    /// Pin number on the SoC
    fn number(&self) -> u8;

    /// Select the pin function
    fn set_function(&mut self, function: PinFunction);

    /// Read back the currently selected function
    fn function(&self) -> PinFunction;

    /// Drive the pin high (logic 1)
    fn set_high(&mut self);

    /// Drive the pin low (logic 0)
    fn set_low(&mut self);

    /// Set the pin to a specific state
    fn set_state(&mut self, high: bool) {
        if high {
            self.set_high();
        } else {
            self.set_low();
        }
    }

    /// Check if the pin reads high (logic 1)
    fn is_high(&self) -> bool;

    /// Check if the pin reads low (logic 0)
    fn is_low(&self) -> bool {
        !self.is_high()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockPin {
        function: PinFunction,
        level: bool,
    }

    impl GpioPin for MockPin {
        fn number(&self) -> u8 {
            18
        }

        fn set_function(&mut self, function: PinFunction) {
            self.function = function;
        }

        fn function(&self) -> PinFunction {
            self.function
        }

        fn set_high(&mut self) {
            self.level = true;
        }

        fn set_low(&mut self) {
            self.level = false;
        }

        fn is_high(&self) -> bool {
            self.level
        }
    }

    #[test]
    fn test_set_state_defaults() {
        let mut pin = MockPin {
            function: PinFunction::Input,
            level: false,
        };
        pin.set_function(PinFunction::Output);
        pin.set_state(true);
        assert!(pin.is_high());
        pin.set_state(false);
        assert!(pin.is_low());
        assert_eq!(pin.function(), PinFunction::Output);
    }
}
