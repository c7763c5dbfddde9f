//! GPIO line plugin
//!
//! Only available on Linux builds with the `gpio` feature; elsewhere the
//! factory fails with an unsupported platform error.

use super::{Context, Other, Plugin, decode_other};
use crate::error::{HestiaError, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Function {
    #[default]
    Input,
    Output,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Settings {
    function: Function,
    pin: Option<u8>,
}

/// Build a gpio plugin for one line
pub async fn new_from_config(ctx: Context, other: Other) -> Result<Box<dyn Plugin>> {
    let cc: Settings = decode_other(&other)?;
    let pin = cc.pin.ok_or_else(|| HestiaError::config("missing pin"))?;

    ctx.logger("gpio")
        .debug(&format!("pin {} as {:?}", pin, cc.function));
    imp::open(pin, cc.function)
}

#[cfg(all(target_os = "linux", feature = "gpio"))]
mod imp {
    use super::Function;
    use crate::error::{HestiaError, Result};
    use crate::plugin::{BoolGetter, BoolSetter, Getter, Plugin, Setter, getter_fn, setter_fn};
    use async_trait::async_trait;
    use rppal::gpio::{Gpio, InputPin, OutputPin};
    use std::sync::{Arc, Mutex};

    enum Line {
        Input(InputPin),
        Output(OutputPin),
    }

    pub struct GpioLine {
        pin: u8,
        line: Arc<Mutex<Line>>,
    }

    fn gpio_err(e: rppal::gpio::Error) -> HestiaError {
        HestiaError::io(format!("gpio: {}", e))
    }

    pub fn open(pin: u8, function: Function) -> Result<Box<dyn Plugin>> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let p = gpio.get(pin).map_err(gpio_err)?;
        let line = match function {
            Function::Input => Line::Input(p.into_input_pullup()),
            Function::Output => Line::Output(p.into_output()),
        };
        Ok(Box::new(GpioLine {
            pin,
            line: Arc::new(Mutex::new(line)),
        }))
    }

    fn poisoned<T>(_: T) -> HestiaError {
        HestiaError::generic("gpio line lock poisoned")
    }

    #[async_trait]
    impl BoolGetter for GpioLine {
        async fn bool_getter(&self) -> Result<Getter<bool>> {
            let input = matches!(*self.line.lock().map_err(poisoned)?, Line::Input(_));
            if !input {
                return Err(HestiaError::config(format!("pin {} is not an input", self.pin)));
            }
            let line = self.line.clone();
            Ok(getter_fn(move || {
                let line = line.clone();
                async move {
                    match &*line.lock().map_err(poisoned)? {
                        Line::Input(p) => Ok(p.is_high()),
                        Line::Output(p) => Ok(p.is_set_high()),
                    }
                }
            }))
        }
    }

    #[async_trait]
    impl BoolSetter for GpioLine {
        async fn bool_setter(&self, _param: &str) -> Result<Setter<bool>> {
            let output = matches!(*self.line.lock().map_err(poisoned)?, Line::Output(_));
            if !output {
                return Err(HestiaError::config(format!("pin {} is not an output", self.pin)));
            }
            let line = self.line.clone();
            Ok(setter_fn(move |v: bool| {
                let line = line.clone();
                async move {
                    if let Line::Output(p) = &mut *line.lock().map_err(poisoned)? {
                        if v { p.set_high() } else { p.set_low() }
                    }
                    Ok(())
                }
            }))
        }
    }

    crate::impl_plugin!(GpioLine, BoolGetter, BoolSetter);
}

#[cfg(not(all(target_os = "linux", feature = "gpio")))]
mod imp {
    use super::Function;
    use crate::error::{HestiaError, Result};
    use crate::plugin::Plugin;

    pub fn open(_pin: u8, _function: Function) -> Result<Box<dyn Plugin>> {
        Err(HestiaError::unsupported_platform("gpio"))
    }
}
