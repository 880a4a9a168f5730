//! The three machines of a build (build, host, target) and what we know
//! about each. Only host == build configurations are handled; there is no
//! machine file.

/// Which machine an object is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Machine {
    Build,
    Host,
    Target,
}

/// The operating system kernel in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Kernel {
    Linux,
    Darwin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Information about one machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub machine: Machine,
    pub kernel: Kernel,
    pub endian: Endian,
    pub cpu_family: String,
    pub cpu: String,
}

impl Info {
    pub fn new(machine: Machine, kernel: Kernel, endian: Endian, cpu: impl Into<String>) -> Self {
        let cpu = cpu.into();
        Self {
            machine,
            kernel,
            endian,
            cpu_family: cpu.clone(),
            cpu,
        }
    }

    pub fn system(&self) -> String {
        self.kernel.to_string()
    }
}

/// A per-machine value with the standard fallback chain: target falls back to
/// host, host falls back to build.
#[derive(Debug, Clone, Default)]
pub struct PerMachine<T> {
    build: T,
    host: Option<T>,
    target: Option<T>,
}

impl<T> PerMachine<T> {
    pub fn new(build: T) -> Self {
        Self {
            build,
            host: None,
            target: None,
        }
    }

    pub fn build(&self) -> &T {
        &self.build
    }

    pub fn build_mut(&mut self) -> &mut T {
        &mut self.build
    }

    pub fn host(&self) -> &T {
        self.host.as_ref().unwrap_or(&self.build)
    }

    pub fn target(&self) -> &T {
        self.target.as_ref().unwrap_or_else(|| self.host())
    }

    pub fn get(&self, machine: Machine) -> &T {
        match machine {
            Machine::Build => self.build(),
            Machine::Host => self.host(),
            Machine::Target => self.target(),
        }
    }

    pub fn get_mut(&mut self, machine: Machine) -> &mut T {
        match machine {
            Machine::Build => &mut self.build,
            Machine::Host => match self.host {
                Some(ref mut host) => host,
                None => &mut self.build,
            },
            Machine::Target => match self.target {
                Some(ref mut target) => target,
                None => match self.host {
                    Some(ref mut host) => host,
                    None => &mut self.build,
                },
            },
        }
    }

    pub fn set(&mut self, machine: Machine, value: T) {
        match machine {
            Machine::Build => self.build = value,
            Machine::Host => self.host = Some(value),
            Machine::Target => self.target = Some(value),
        }
    }
}

/// Detect the build machine. All of this is known at compile time.
pub fn detect_build() -> Info {
    let kernel = if cfg!(target_os = "macos") {
        Kernel::Darwin
    } else {
        Kernel::Linux
    };

    let endian = if cfg!(target_endian = "big") {
        Endian::Big
    } else {
        Endian::Little
    };

    Info::new(Machine::Build, kernel, endian, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_machine_fallback() {
        let machines: PerMachine<u32> = PerMachine::new(1);
        assert_eq!(*machines.get(Machine::Build), 1);
        assert_eq!(*machines.get(Machine::Host), 1);
        assert_eq!(*machines.get(Machine::Target), 1);

        let mut machines = machines;
        machines.set(Machine::Host, 2);
        assert_eq!(*machines.get(Machine::Build), 1);
        assert_eq!(*machines.get(Machine::Host), 2);
        assert_eq!(*machines.get(Machine::Target), 2);
    }

    #[test]
    fn build_machine_is_sane() {
        let info = detect_build();
        assert_eq!(info.machine, Machine::Build);
        assert!(!info.cpu_family.is_empty());
    }
}
