//! Pseudocode Programs
//!
//! One instruction per line. Blank lines and `#` comments are skipped.

use crate::{KernelError, KernelResult};

/// A single pseudocode instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Burn one instruction slot
    Noop,
    /// Sleep on a device of the named pool
    Io { device: String, duration_ms: u64 },
    /// Create a child process
    InitProc { path: String, size: u64 },
    /// Ask memory to dump this process
    DumpMemory,
    /// Terminate
    Exit,
}

impl std::str::FromStr for Instruction {
    type Err = KernelError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let opcode = parts
            .next()
            .ok_or_else(|| KernelError::Program("Empty instruction".into()))?;
        let args: Vec<&str> = parts.collect();

        let instruction = match (opcode.to_uppercase().as_str(), args.as_slice()) {
            ("NOOP", []) => Instruction::Noop,
            ("IO", [device, duration]) => Instruction::Io {
                device: device.to_string(),
                duration_ms: parse_number(duration, line)?,
            },
            ("INIT_PROC", [path, size]) => Instruction::InitProc {
                path: path.to_string(),
                size: parse_number(size, line)?,
            },
            ("DUMP_MEMORY", []) => Instruction::DumpMemory,
            ("EXIT", []) => Instruction::Exit,
            _ => return Err(KernelError::Program(format!("Invalid instruction: {}", line.trim()))),
        };
        Ok(instruction)
    }
}

fn parse_number(value: &str, line: &str) -> KernelResult<u64> {
    value
        .parse()
        .map_err(|_| KernelError::Program(format!("Invalid number '{}' in: {}", value, line.trim())))
}

/// Parse a whole program
pub fn parse_program(source: &str) -> KernelResult<Vec<Instruction>> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.parse::<Instruction>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program() {
        let source = "
            # warm up
            NOOP
            IO DISK 250
            INIT_PROC programs/child 64

            DUMP_MEMORY
            EXIT
        ";

        let program = parse_program(source).unwrap();
        assert_eq!(
            program,
            vec![
                Instruction::Noop,
                Instruction::Io {
                    device: "DISK".into(),
                    duration_ms: 250
                },
                Instruction::InitProc {
                    path: "programs/child".into(),
                    size: 64
                },
                Instruction::DumpMemory,
                Instruction::Exit,
            ]
        );
    }

    #[test]
    fn test_lowercase_opcodes() {
        assert_eq!("noop".parse::<Instruction>().unwrap(), Instruction::Noop);
    }

    #[test]
    fn test_invalid_instructions() {
        assert!(matches!("JUMP 4".parse::<Instruction>(), Err(KernelError::Program(_))));
        assert!("IO DISK".parse::<Instruction>().is_err());
        assert!("IO DISK soon".parse::<Instruction>().is_err());
        assert!("EXIT now".parse::<Instruction>().is_err());
        assert!(parse_program("NOOP\nBOGUS\n").is_err());
    }
}
