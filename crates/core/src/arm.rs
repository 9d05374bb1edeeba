use std::fmt;
use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::error::ArmError;
use crate::logger;

pub const DEFAULT_SPEED: u32 = 30;
pub const STEP_PAUSE: Duration = Duration::from_millis(500);
pub const BAUD_RATE: u32 = 9600;
/// The controller resets when the port opens and ignores input meanwhile.
pub const SETTLE_DELAY: Duration = Duration::from_secs(7);

/// One line of the servo controller protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoCommand {
    pub motor: u8,
    pub angle: u16,
    pub speed: u32,
}

impl fmt::Display for ServoCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{} A{} V{}", self.motor, self.angle, self.speed)
    }
}

/// Named poses as (motor, angle) steps.
fn move_steps(name: &str) -> Option<&'static [(u8, u16)]> {
    let steps: &'static [(u8, u16)] = match name {
        "sit" => &[(4, 40), (5, 150), (6, 180)],
        "down" => &[(4, 93), (5, 180), (6, 180)],
        "forward" => &[(4, 90), (5, 150), (6, 125)],
        "left" => &[(3, 180)],
        "right" => &[(3, 0)],
        "open" => &[(7, 120)],
        "close" => &[(7, 20)],
        "middle" => &[(3, 90)],
        _ => return None,
    };
    Some(steps)
}

fn button_moves(name: &str) -> Option<[&'static str; 2]> {
    match name {
        "left" => Some(["left", "down"]),
        "middle" => Some(["middle", "down"]),
        "right" => Some(["right", "down"]),
        _ => None,
    }
}

/// Servo arm behind any byte sink, usually a serial port.
pub struct Arm<W: Write> {
    port: W,
    speed: u32,
    pause: Duration,
}

impl<W: Write> Arm<W> {
    pub fn new(port: W) -> Self {
        Self { port, speed: DEFAULT_SPEED, pause: STEP_PAUSE }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn into_inner(self) -> W {
        self.port
    }

    pub fn servo(&mut self, motor: u8, angle: i64) -> Result<String, ArmError> {
        let angle = u16::try_from(angle)
            .ok()
            .filter(|a| *a <= 180)
            .ok_or(ArmError::AngleOutOfRange(angle))?;
        let cmd = ServoCommand { motor, angle, speed: self.speed };
        writeln!(self.port, "{}", cmd)?;
        self.port.flush()?;
        logger::info_p("arm", &format!("sent {}", cmd));
        Ok(format!("command '{}' sent", cmd))
    }

    pub fn perform(&mut self, name: &str) -> Result<String, ArmError> {
        let name = name.trim().to_lowercase();
        let steps = move_steps(&name).ok_or_else(|| ArmError::UnknownMove(name.clone()))?;
        for &(motor, angle) in steps {
            self.servo(motor, i64::from(angle))?;
            std::thread::sleep(self.pause);
        }
        Ok(format!("move '{}' done", name))
    }

    pub fn press(&mut self, button: &str) -> Result<String, ArmError> {
        let button = button.trim().to_lowercase();
        let moves = button_moves(&button).ok_or_else(|| ArmError::UnknownButton(button.clone()))?;
        for name in moves {
            self.perform(name)?;
            std::thread::sleep(self.pause);
        }
        Ok(format!("button '{}' pressed", button))
    }
}

#[cfg(feature = "serial")]
pub fn open_serial(port: &str) -> Result<Box<dyn serialport::SerialPort>> {
    use anyhow::Context;

    let port = serialport::new(port, BAUD_RATE)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_secs(1))
        .open()
        .with_context(|| format!("opening serial port {}", port))?;
    logger::info_p("arm", &format!("connected at {} baud, waiting for the controller", BAUD_RATE));
    std::thread::sleep(SETTLE_DELAY);
    Ok(port)
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ArmCommand {
    Servo { motor: u8, angle: i64 },
    Move(String),
    Button(String),
    Delay(Duration),
    Time,
    Elapsed,
    Quit,
}

impl std::str::FromStr for ArmCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["servo", motor, angle] => {
                let motor = motor.parse().map_err(|_| format!("bad motor number '{}'", motor))?;
                let angle = angle.parse().map_err(|_| format!("bad angle '{}'", angle))?;
                Ok(ArmCommand::Servo { motor, angle })
            }
            ["servo", ..] => Err("usage: servo <motor> <angle>".into()),
            ["move", name] => Ok(ArmCommand::Move(name.to_string())),
            ["button", name] => Ok(ArmCommand::Button(name.to_string())),
            ["delay", secs] => secs
                .parse::<f64>()
                .ok()
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .map(ArmCommand::Delay)
                .ok_or_else(|| format!("bad delay '{}'", secs)),
            ["time"] => Ok(ArmCommand::Time),
            ["elapsed"] => Ok(ArmCommand::Elapsed),
            ["quit"] | ["exit"] => Ok(ArmCommand::Quit),
            [] => Err("empty command".into()),
            _ => Err(format!("unknown command '{}'", line.trim())),
        }
    }
}

/// Read commands from `input` until `quit` or EOF, replying on `out`.
pub fn run_repl<W: Write, R: BufRead, O: Write>(arm: &mut Arm<W>, input: R, mut out: O) -> Result<()> {
    let mut last_input = Instant::now();
    for line in input.lines() {
        let line = line?;
        let now = Instant::now();
        let since_last = now.duration_since(last_input);
        last_input = now;
        if line.trim().is_empty() {
            continue;
        }

        let reply = match line.parse::<ArmCommand>() {
            Ok(ArmCommand::Quit) => break,
            Ok(ArmCommand::Servo { motor, angle }) => arm.servo(motor, angle).map_err(|e| e.to_string()),
            Ok(ArmCommand::Move(name)) => arm.perform(&name).map_err(|e| e.to_string()),
            Ok(ArmCommand::Button(name)) => arm.press(&name).map_err(|e| e.to_string()),
            Ok(ArmCommand::Delay(d)) => {
                std::thread::sleep(d);
                Ok(format!("waited {:.1}s", d.as_secs_f64()))
            }
            Ok(ArmCommand::Time) => Ok(chrono::Local::now().format("%H:%M:%S").to_string()),
            Ok(ArmCommand::Elapsed) => Ok(format!("{:.1}s since last input", since_last.as_secs_f64())),
            Err(e) => Err(e),
        };
        match reply {
            Ok(msg) => writeln!(out, "{}", msg)?,
            Err(msg) => {
                logger::warn_p("arm", &msg);
                writeln!(out, "error: {}", msg)?
            }
        }
    }
    Ok(())
}
