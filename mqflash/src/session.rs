//! Programming session: retry policy, step sequencing, and the facade the
//! surrounding test station calls.
//!
//! A session is strictly synchronous: each step sends one frame and blocks
//! in a bounded polling loop until the response arrives or the step's
//! budget runs out. Steps run in a fixed order with no branching back;
//! once the flash is erased there is no path to a pre-erase state, and a
//! failure after that point leaves the device in an undefined flash state
//! that only a fresh run from induct can repair. There is no whole-session
//! retry for the same reason. A caller that needs to abort mid-command
//! closes the port, which fails the poll loop on its next read.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::chip::{self, DEFAULT_BAUD};
use crate::error::{Error, Result};
use crate::image::FlashImage;
use crate::options::{EraseKind, ProgramOptions};
use crate::port::Port;
use crate::protocol::frame::{
    self, Command, Opcode, Status, CUSTOMER_INFO_LEN, INDUCT_MAGIC, INDUCT_PAYLOAD_LEN,
    INDUCT_RESPONSE_LEN, STATUS_RESPONSE_LEN,
};

/// A step of the programming workflow, named in diagnostics and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Coax the device into ISP mode.
    Induct,
    /// Verify the line with consecutive handshakes.
    Handshake,
    /// Erase flash.
    Erase,
    /// Write sector windows.
    LoadFlash,
    /// Write option bytes.
    SetOption,
    /// Write protect option bytes.
    SetProtect,
    /// Write the customer info block.
    SetCustomerInfo,
    /// Leave ISP mode.
    Quit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Induct => write!(f, "induct"),
            Self::Handshake => write!(f, "handshake"),
            Self::Erase => write!(f, "erase"),
            Self::LoadFlash => write!(f, "load flash"),
            Self::SetOption => write!(f, "set option"),
            Self::SetProtect => write!(f, "set protect"),
            Self::SetCustomerInfo => write!(f, "set customer info"),
            Self::Quit => write!(f, "quit"),
        }
    }
}

/// Retry and timeout budget for one command exchange.
///
/// Every step waits for its response in a polling loop: sleep
/// `poll_interval`, check how many bytes are available, give up on the
/// attempt after `per_attempt_timeout`, resend up to `max_attempts`
/// times. Keeping the three numbers in one value makes each step's timing
/// assumptions visible and lets tests shrink them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Send attempts before the step fails.
    pub max_attempts: u32,
    /// Sleep between availability polls.
    pub poll_interval: Duration,
    /// Budget for one attempt's response wait.
    pub per_attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Create a new policy.
    pub const fn new(
        max_attempts: u32,
        poll_interval: Duration,
        per_attempt_timeout: Duration,
    ) -> Self {
        Self {
            max_attempts,
            poll_interval,
            per_attempt_timeout,
        }
    }
}

/// Timing and retry configuration for one programming session.
///
/// The defaults are the production budgets measured against real MQ79
/// hardware. Full-chip erase gets its own, much longer budget because
/// physically erasing the array takes on the order of a second, far
/// beyond any other exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Budget for the induct step. The device may still be booting, so
    /// the attempt count is high and each attempt short.
    pub induct: RetryPolicy,
    /// Budget for ordinary command exchanges.
    pub command: RetryPolicy,
    /// Budget for full-chip erase.
    pub erase_full: RetryPolicy,
    /// Consecutive successful handshakes required before proceeding.
    /// Guards against a device that intermittently echoes valid frames
    /// from line noise during power-up.
    pub handshake_successes: u32,
    /// Settle delay before each sector write.
    pub pre_sector_delay: Duration,
    /// Settle delay after each sector write. Skipping either delay is a
    /// known source of intermittent flash corruption on real hardware.
    pub post_sector_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            induct: RetryPolicy::new(50, Duration::from_millis(10), Duration::from_millis(60)),
            command: RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(50)),
            erase_full: RetryPolicy::new(2, Duration::from_millis(20), Duration::from_millis(1200)),
            handshake_successes: 3,
            pre_sector_delay: Duration::from_millis(2),
            post_sector_delay: Duration::from_millis(3),
        }
    }
}

/// Progress of a session through the programming workflow.
///
/// States advance in one direction only. There is deliberately no
/// transition out of a failure other than starting a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing exchanged yet.
    Idle,
    /// Device answered the induct magic with the expected identity.
    Inducted,
    /// Required consecutive handshakes observed.
    Handshaken,
    /// Flash erased. From here on the device's flash contents are
    /// undefined until programming completes.
    Erased,
    /// All sector windows written; carries the sector count.
    Programmed(usize),
    /// Option bytes written.
    Configured,
    /// Protect options written.
    Protected,
    /// Device released back to normal execution.
    Quit,
    /// A step failed terminally; see the returned error for the step
    /// name and diagnostic.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Inducted => write!(f, "inducted"),
            Self::Handshaken => write!(f, "handshaken"),
            Self::Erased => write!(f, "erased"),
            Self::Programmed(n) => write!(f, "programmed ({n} sectors)"),
            Self::Configured => write!(f, "configured"),
            Self::Protected => write!(f, "protected"),
            Self::Quit => write!(f, "quit"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// ISP programming session over one exclusively-owned port.
///
/// Generic over the port type `P` so the full protocol stack runs against
/// an in-memory port in tests.
pub struct Programmer<P: Port> {
    port: P,
    config: SessionConfig,
    state: SessionState,
}

impl<P: Port> Programmer<P> {
    /// Create a session with production timing.
    pub fn new(port: P) -> Self {
        Self::with_config(port, SessionConfig::default())
    }

    /// Create a session with explicit timing.
    pub fn with_config(port: P, config: SessionConfig) -> Self {
        Self {
            port,
            config,
            state: SessionState::Idle,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Reset the port to the protocol's baud rate and discard any stale
    /// input. Call before the first session on a freshly opened port and
    /// between sessions on a reused one.
    pub fn initialize(&mut self) -> Result<()> {
        debug!("Initializing port {} at {DEFAULT_BAUD} baud", self.port.name());
        self.port.set_baud_rate(DEFAULT_BAUD)?;
        self.port.clear_buffers()?;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Coax a freshly reset device into ISP mode.
    ///
    /// Sends the bare 3-byte magic and waits for a valid induct response.
    /// Any deviation — wrong status, wrong model code, malformed frame —
    /// is treated as "not yet in ISP mode" and retried, because the
    /// device may still be booting. Only the exhausted budget is an
    /// error.
    pub fn enter_isp_mode(&mut self) -> Result<()> {
        let policy = self.config.induct;
        info!("Waiting for device on {} to enter ISP mode...", self.port.name());

        for attempt in 1..=policy.max_attempts {
            match self.try_induct(policy) {
                Ok(model) => {
                    info!("Device entered ISP mode (model code {model:#06x})");
                    self.state = SessionState::Inducted;
                    return Ok(());
                }
                Err(e) => {
                    trace!(
                        "Induct attempt {attempt}/{}: {e}",
                        policy.max_attempts
                    );
                    if attempt < policy.max_attempts {
                        thread::sleep(policy.poll_interval);
                        let _ = self.port.clear_buffers();
                    }
                }
            }
        }

        Err(Error::Timeout {
            step: Step::Induct,
            detail: format!(
                "device did not enter ISP mode after {} attempts",
                policy.max_attempts
            ),
        })
    }

    /// One induct attempt. Returns the reported model code on success.
    fn try_induct(&mut self, policy: RetryPolicy) -> Result<u16> {
        self.port.write_all_bytes(&INDUCT_MAGIC)?;
        let raw = self.read_response(Step::Induct, INDUCT_RESPONSE_LEN, policy)?;

        let parsed = frame::decode(&raw, Opcode::RespondInduct)?;
        if parsed.payload.len() != INDUCT_PAYLOAD_LEN {
            return Err(Error::StepFailed {
                step: Step::Induct,
                detail: format!("induct payload is {} bytes", parsed.payload.len()),
            });
        }
        match parsed.status() {
            Some(Status::Okey) => {}
            other => {
                return Err(Error::StepFailed {
                    step: Step::Induct,
                    detail: format!("induct status {other:?}"),
                });
            }
        }

        let model = parsed.model_code().ok_or_else(|| Error::StepFailed {
            step: Step::Induct,
            detail: "induct response carried no model code".into(),
        })?;
        if !chip::is_supported_model(model) {
            return Err(Error::StepFailed {
                step: Step::Induct,
                detail: format!("unsupported model code {model:#06x}"),
            });
        }
        Ok(model)
    }

    /// Run the full programming cycle against a validated image.
    pub fn program(&mut self, image: &FlashImage, options: &ProgramOptions) -> Result<()> {
        self.program_with_progress(image, options, |_, _| {})
    }

    /// Run the full programming cycle, reporting sector progress.
    ///
    /// `progress` is called after each sector write with
    /// `(sectors_done, sectors_total)`.
    pub fn program_with_progress<F>(
        &mut self,
        image: &FlashImage,
        options: &ProgramOptions,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        info!(
            "Programming {} bytes ({} sectors) on {}",
            image.len(),
            image.sector_count(),
            self.port.name()
        );

        match self.run_cycle(image, options, &mut progress) {
            Ok(()) => {
                info!("Programming complete, device released");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    /// Erase flash without programming anything: induct, handshake,
    /// erase, quit. The option bytes are left untouched.
    pub fn erase_flash(&mut self, options: &ProgramOptions) -> Result<()> {
        info!("Erasing flash ({:?}) on {}", options.erase, self.port.name());

        match self.run_erase_cycle(options) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn run_erase_cycle(&mut self, options: &ProgramOptions) -> Result<()> {
        self.enter_isp_mode()?;
        self.handshake()?;
        self.erase(options)?;
        self.quit()
    }

    fn run_cycle<F>(
        &mut self,
        image: &FlashImage,
        options: &ProgramOptions,
        progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.enter_isp_mode()?;
        self.handshake()?;
        self.erase(options)?;
        self.load_flash(image, progress)?;

        let policy = self.config.command;
        self.exchange(Step::SetOption, &Command::SetOption(options.clone()), policy)?;
        self.state = SessionState::Configured;
        debug!("Session state: {}", self.state);

        self.exchange(Step::SetProtect, &Command::SetProtect(options.clone()), policy)?;
        self.state = SessionState::Protected;
        debug!("Session state: {}", self.state);

        self.quit()
    }

    /// Require N consecutive successful handshakes before proceeding. A
    /// failure resets the streak; the failure budget is the ordinary
    /// command budget.
    fn handshake(&mut self) -> Result<()> {
        let policy = self.config.command;
        let needed = self.config.handshake_successes;
        let mut consecutive = 0u32;
        let mut failures = 0u32;

        while consecutive < needed {
            match self.try_exchange_once(Step::Handshake, &Command::Handshake, policy) {
                Ok(()) => {
                    consecutive += 1;
                    trace!("Handshake {consecutive}/{needed}");
                }
                Err(e) => {
                    failures += 1;
                    if failures >= policy.max_attempts {
                        return Err(e);
                    }
                    warn!(
                        "Handshake failed (streak reset, failure {failures}/{}): {e}",
                        policy.max_attempts
                    );
                    consecutive = 0;
                    let _ = self.port.clear_buffers();
                    thread::sleep(policy.poll_interval);
                }
            }
        }

        self.state = SessionState::Handshaken;
        debug!("Session state: {}", self.state);
        Ok(())
    }

    /// Erase flash. Full-chip erase runs under its own, much longer
    /// response budget.
    fn erase(&mut self, options: &ProgramOptions) -> Result<()> {
        let policy = match options.erase {
            EraseKind::FullChip => self.config.erase_full,
            EraseKind::Partial | EraseKind::PartialKeepData => self.config.command,
        };
        let command = Command::Erase {
            kind: options.erase,
            range: options.erase_range,
        };
        debug!("Erasing flash ({:?})", options.erase);
        self.exchange(Step::Erase, &command, policy)?;

        self.state = SessionState::Erased;
        debug!("Session state: {}", self.state);
        Ok(())
    }

    /// Stream the image into flash in 128-byte windows from address 0.
    ///
    /// Each write is bracketed by the configured settle delays so the
    /// device's flash controller can finish the previous operation. The
    /// loop ends after the image's last window, full or short, and never
    /// runs past the image end.
    fn load_flash<F>(&mut self, image: &FlashImage, progress: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let policy = self.config.command;
        let total = image.sector_count();

        for (index, window) in image.sectors().enumerate() {
            thread::sleep(self.config.pre_sector_delay);
            let command = Command::LoadFlash {
                address: window.address,
                data: window.data,
            };
            self.exchange(Step::LoadFlash, &command, policy)?;
            thread::sleep(self.config.post_sector_delay);

            trace!("Sector {}/{total} written at {:#06x}", index + 1, window.address);
            progress(index + 1, total);
        }

        self.state = SessionState::Programmed(total);
        debug!("Session state: {}", self.state);
        Ok(())
    }

    /// Release the device back to normal execution. Best-effort: if the
    /// device does not acknowledge, it stays in ISP mode and only a power
    /// cycle recovers it, which is reported as its own terminal error.
    fn quit(&mut self) -> Result<()> {
        let policy = self.config.command;
        match self.exchange(Step::Quit, &Command::Quit, policy) {
            Ok(()) => {
                self.state = SessionState::Quit;
                debug!("Session state: {}", self.state);
                Ok(())
            }
            Err(e) => Err(Error::DeviceLeftInIsp(format!(
                "quit not acknowledged ({e}); power-cycle the device to leave ISP mode"
            ))),
        }
    }

    /// Write the customer info block, zero-padded to its fixed size.
    ///
    /// Part of the protocol surface but not of the default programming
    /// sequence; the factory flow leaves the block untouched.
    pub fn set_customer_info(&mut self, info: &[u8]) -> Result<()> {
        if info.len() > CUSTOMER_INFO_LEN {
            return Err(Error::StepFailed {
                step: Step::SetCustomerInfo,
                detail: format!(
                    "customer info is {} bytes, limit is {CUSTOMER_INFO_LEN}",
                    info.len()
                ),
            });
        }
        let mut block = [0u8; CUSTOMER_INFO_LEN];
        block[..info.len()].copy_from_slice(info);

        let policy = self.config.command;
        self.exchange(Step::SetCustomerInfo, &Command::SetCustomerInfo(block), policy)
    }

    /// Send a command and retry within its budget until the device
    /// accepts it.
    fn exchange(&mut self, step: Step, command: &Command, policy: RetryPolicy) -> Result<()> {
        let mut last: Option<Error> = None;

        for attempt in 1..=policy.max_attempts {
            if attempt > 1 {
                // Stale bytes from the failed attempt would desync the
                // next response read.
                let _ = self.port.clear_buffers();
            }
            match self.try_exchange_once(step, command, policy) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("{step} attempt {attempt}/{}: {e}", policy.max_attempts);
                    last = Some(e);
                }
            }
        }

        Err(last.unwrap_or_else(|| Error::StepFailed {
            step,
            detail: "retry budget exhausted".into(),
        }))
    }

    /// One send-and-wait exchange: encode, write, block for the status
    /// response.
    fn try_exchange_once(
        &mut self,
        step: Step,
        command: &Command,
        policy: RetryPolicy,
    ) -> Result<()> {
        let raw = command.encode();
        trace!("{step}: sending {} bytes", raw.len());
        self.port.write_all_bytes(&raw)?;

        let response = self.read_response(step, STATUS_RESPONSE_LEN, policy)?;
        let parsed = frame::decode(&response, command.opcode())?;
        match parsed.status() {
            Some(status) if status.is_ok() => Ok(()),
            Some(status) => Err(Error::StepFailed {
                step,
                detail: format!("device reported {status}"),
            }),
            None => Err(Error::StepFailed {
                step,
                detail: "response carried no status word".into(),
            }),
        }
    }

    /// Bounded polling wait for exactly `len` response bytes.
    ///
    /// Suspension happens only here: sleep a fixed interval, re-check how
    /// many bytes the port has buffered, fail the attempt when the budget
    /// is spent. Closing the port from another owner makes the next poll
    /// fail, which is the only way to abort a command in flight.
    fn read_response(&mut self, step: Step, len: usize, policy: RetryPolicy) -> Result<Vec<u8>> {
        let start = Instant::now();

        while (self.port.bytes_to_read()? as usize) < len {
            if start.elapsed() >= policy.per_attempt_timeout {
                return Err(Error::Timeout {
                    step,
                    detail: format!(
                        "no {len}-byte response within {:?}",
                        policy.per_attempt_timeout
                    ),
                });
            }
            thread::sleep(policy.poll_interval);
        }

        let mut buf = vec![0u8; len];
        self.port.read_exact(&mut buf)?;
        trace!("{step}: received {len} bytes");
        Ok(buf)
    }
}

impl Programmer<crate::port::NativePort> {
    /// Open the named serial port at the protocol baud rate and wrap it
    /// in a session with production timing.
    ///
    /// The open is retried a few times because the station's USB adapter
    /// occasionally needs a moment to release the port from a previous
    /// run.
    pub fn open(port_name: &str) -> Result<Self> {
        const MAX_OPEN_ATTEMPTS: usize = 3;
        const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

        let mut last_error = None;

        for attempt in 1..=MAX_OPEN_ATTEMPTS {
            let config = crate::port::SerialConfig::new(port_name, DEFAULT_BAUD);
            match crate::port::NativePort::open(&config) {
                Ok(port) => {
                    if attempt > 1 {
                        debug!("Port opened on attempt {attempt}");
                    }
                    return Ok(Self::new(port));
                }
                Err(e) => {
                    warn!(
                        "Failed to open port {port_name} (attempt {attempt}/{MAX_OPEN_ATTEMPTS}): {e}"
                    );
                    last_error = Some(e);

                    if attempt < MAX_OPEN_ATTEMPTS {
                        thread::sleep(OPEN_RETRY_DELAY);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Serial(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "port open failed",
            ))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{FLASH_CAPACITY, MODEL_MQ79F081, MODEL_MQ79F121, SECTOR_SIZE};
    use crate::protocol::checksum::xor_fold;
    use crate::protocol::frame::{encode_frame, DEVICE_IDENTIFIER, FRAME_OVERHEAD};
    use std::collections::VecDeque;

    /// In-memory port with independent read/write buffers.
    struct MockPort {
        read_buf: VecDeque<u8>,
        write_buf: Vec<u8>,
        baud: u32,
        timeout: Duration,
    }

    impl MockPort {
        fn new(responses: &[u8]) -> Self {
            Self {
                read_buf: responses.iter().copied().collect(),
                write_buf: Vec::new(),
                baud: 0,
                timeout: Duration::from_millis(100),
            }
        }
    }

    impl std::io::Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.read_buf.is_empty() {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(self.read_buf.len());
            for b in buf.iter_mut().take(n) {
                *b = self.read_buf.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl std::io::Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.write_buf.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn set_timeout(&mut self, timeout: Duration) -> crate::error::Result<()> {
            self.timeout = timeout;
            Ok(())
        }
        fn timeout(&self) -> Duration {
            self.timeout
        }
        fn set_baud_rate(&mut self, baud_rate: u32) -> crate::error::Result<()> {
            self.baud = baud_rate;
            Ok(())
        }
        fn baud_rate(&self) -> u32 {
            self.baud
        }
        fn bytes_to_read(&mut self) -> crate::error::Result<u32> {
            Ok(self.read_buf.len() as u32)
        }
        fn clear_buffers(&mut self) -> crate::error::Result<()> {
            // Responses are modeled as arriving exactly when the session
            // waits for them, so there is never stale input to discard.
            Ok(())
        }
        fn name(&self) -> &str {
            "mock"
        }
        fn close(&mut self) -> crate::error::Result<()> {
            self.read_buf.clear();
            Ok(())
        }
    }

    fn fast_config() -> SessionConfig {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5));
        SessionConfig {
            induct: policy,
            command: policy,
            erase_full: policy,
            handshake_successes: 3,
            pre_sector_delay: Duration::ZERO,
            post_sector_delay: Duration::ZERO,
        }
    }

    fn status_response(echo: Opcode, status: Opcode) -> Vec<u8> {
        encode_frame(DEVICE_IDENTIFIER, echo, &(status as u16).to_le_bytes())
    }

    fn induct_response(status: Opcode, model: u16) -> Vec<u8> {
        let mut payload = (status as u16).to_le_bytes().to_vec();
        payload.extend_from_slice(&model.to_le_bytes());
        encode_frame(DEVICE_IDENTIFIER, Opcode::RespondInduct, &payload)
    }

    /// Device script for a clean full programming run.
    fn happy_responses(sectors: usize) -> Vec<u8> {
        let mut script = induct_response(Opcode::StatusOkey, MODEL_MQ79F121);
        for _ in 0..3 {
            script.extend(status_response(Opcode::Handshake, Opcode::StatusOkey));
        }
        script.extend(status_response(Opcode::EraseFlash, Opcode::StatusOkey));
        for _ in 0..sectors {
            script.extend(status_response(Opcode::LoadFlash, Opcode::StatusOkey));
        }
        script.extend(status_response(Opcode::SetOption, Opcode::StatusOkey));
        script.extend(status_response(Opcode::SetProtectOption, Opcode::StatusOkey));
        script.extend(status_response(Opcode::Quit, Opcode::StatusOkey));
        script
    }

    /// Split the captured host traffic into the induct magic and the
    /// framed requests that followed it.
    fn parse_requests(written: &[u8]) -> Vec<(Opcode, Vec<u8>)> {
        assert!(written.len() >= 3, "no induct magic written");
        assert_eq!(&written[..3], &INDUCT_MAGIC);

        let mut frames = Vec::new();
        let mut at = 3;
        while at < written.len() {
            let declared = usize::from(u16::from_be_bytes([written[at + 8], written[at + 9]]));
            let total = FRAME_OVERHEAD + declared;
            let raw = &written[at..at + total];
            let opcode = Opcode::from_u16(u16::from_le_bytes([raw[6], raw[7]]))
                .expect("host wrote an unknown opcode");
            frames.push((opcode, raw.to_vec()));
            at += total;
        }
        assert_eq!(at, written.len(), "trailing bytes after the last frame");
        frames
    }

    #[test]
    fn initialize_resets_baud_and_state() {
        let mut programmer = Programmer::with_config(MockPort::new(&[]), fast_config());
        programmer.initialize().unwrap();
        assert_eq!(programmer.port().baud_rate(), DEFAULT_BAUD);
        assert_eq!(programmer.state(), SessionState::Idle);
    }

    #[test]
    fn enter_isp_mode_accepts_the_supported_model() {
        let script = induct_response(Opcode::StatusOkey, MODEL_MQ79F121);
        let mut programmer = Programmer::with_config(MockPort::new(&script), fast_config());
        programmer.enter_isp_mode().unwrap();
        assert_eq!(programmer.state(), SessionState::Inducted);
        assert_eq!(programmer.port().write_buf, INDUCT_MAGIC);
    }

    #[test]
    fn enter_isp_mode_rejects_any_single_field_deviation() {
        // Wrong model code.
        let wrong_model = induct_response(Opcode::StatusOkey, MODEL_MQ79F081);
        // Wrong status.
        let wrong_status = induct_response(Opcode::StatusOtherError, MODEL_MQ79F121);
        // Corrupted checksum.
        let mut bad_checksum = induct_response(Opcode::StatusOkey, MODEL_MQ79F121);
        let checksum_offset = bad_checksum.len() - 3;
        bad_checksum[checksum_offset] ^= 0xFF;
        // Wrong command echo.
        let wrong_command = status_response(Opcode::Handshake, Opcode::StatusOkey);

        for script in [wrong_model, wrong_status, bad_checksum, wrong_command] {
            let mut programmer =
                Programmer::with_config(MockPort::new(&script), fast_config());
            let err = programmer.enter_isp_mode().unwrap_err();
            assert!(
                matches!(err, Error::Timeout { step: Step::Induct, .. }),
                "deviation must read as not-in-ISP-mode, got {err:?}"
            );
            assert_ne!(programmer.state(), SessionState::Inducted);
        }
    }

    #[test]
    fn program_full_image_emits_ninety_six_sector_frames() {
        let image = FlashImage::new(vec![0xFF; FLASH_CAPACITY]).unwrap();
        let mut programmer = Programmer::with_config(
            MockPort::new(&happy_responses(96)),
            fast_config(),
        );

        let mut reported = Vec::new();
        programmer
            .program_with_progress(&image, &ProgramOptions::default(), |done, total| {
                reported.push((done, total));
            })
            .unwrap();
        assert_eq!(programmer.state(), SessionState::Quit);
        assert_eq!(reported.len(), 96);
        assert_eq!(reported.last(), Some(&(96, 96)));

        let frames = parse_requests(&programmer.into_port().write_buf);
        let loads: Vec<_> = frames
            .iter()
            .filter(|(op, _)| *op == Opcode::LoadFlash)
            .collect();
        assert_eq!(loads.len(), 96);

        // Every LoadFlash frame passes the checksum fold round-trip.
        for (_, raw) in &loads {
            assert_eq!(xor_fold(&raw[..raw.len() - 1]), 0);
        }

        // Sector addresses walk the image in order.
        for (index, (_, raw)) in loads.iter().enumerate() {
            let address = u32::from_le_bytes([raw[10], raw[11], raw[12], raw[13]]);
            assert_eq!(address as usize, index * SECTOR_SIZE);
        }

        // The cycle ends with a zero-payload Quit.
        let (last_opcode, last_raw) = frames.last().unwrap();
        assert_eq!(*last_opcode, Opcode::Quit);
        assert_eq!(last_raw.len(), FRAME_OVERHEAD);

        // Strict step order: handshake x3, erase, 96 loads, options,
        // protect, quit.
        let opcodes: Vec<_> = frames.iter().map(|(op, _)| *op).collect();
        let mut expected = vec![Opcode::Handshake; 3];
        expected.push(Opcode::EraseFlash);
        expected.extend(std::iter::repeat_n(Opcode::LoadFlash, 96));
        expected.push(Opcode::SetOption);
        expected.push(Opcode::SetProtectOption);
        expected.push(Opcode::Quit);
        assert_eq!(opcodes, expected);
    }

    #[test]
    fn partial_final_window_is_sent_zero_padded() {
        let image = FlashImage::new(vec![0x5A; SECTOR_SIZE + 16]).unwrap();
        let mut programmer = Programmer::with_config(
            MockPort::new(&happy_responses(2)),
            fast_config(),
        );
        programmer
            .program(&image, &ProgramOptions::default())
            .unwrap();

        let frames = parse_requests(&programmer.into_port().write_buf);
        let loads: Vec<_> = frames
            .iter()
            .filter(|(op, _)| *op == Opcode::LoadFlash)
            .collect();
        assert_eq!(loads.len(), 2);

        let (_, raw) = loads[1];
        let data = &raw[16..16 + SECTOR_SIZE];
        assert_eq!(&data[..16], &[0x5A; 16]);
        assert_eq!(&data[16..], &[0u8; SECTOR_SIZE - 16]);
    }

    #[test]
    fn oversized_image_fails_before_any_transport_io() {
        let err = FlashImage::new(vec![0xFF; FLASH_CAPACITY + 1]).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { .. }));

        // Nothing reached the port: the image cannot even be constructed,
        // so a session never starts.
        let programmer = Programmer::with_config(MockPort::new(&[]), fast_config());
        assert!(programmer.into_port().write_buf.is_empty());
    }

    #[test]
    fn handshake_streak_resets_on_failure() {
        // Two good handshakes, then an error status, then silence: the
        // streak never reaches three and the failure budget runs out.
        let mut script = induct_response(Opcode::StatusOkey, MODEL_MQ79F121);
        script.extend(status_response(Opcode::Handshake, Opcode::StatusOkey));
        script.extend(status_response(Opcode::Handshake, Opcode::StatusOkey));
        script.extend(status_response(Opcode::Handshake, Opcode::StatusValidationError));

        let image = FlashImage::new(vec![0xFF; SECTOR_SIZE]).unwrap();
        let mut programmer = Programmer::with_config(MockPort::new(&script), fast_config());
        let err = programmer
            .program(&image, &ProgramOptions::default())
            .unwrap_err();
        assert!(
            matches!(
                err,
                Error::StepFailed { step: Step::Handshake, .. }
                    | Error::Timeout { step: Step::Handshake, .. }
            ),
            "got {err:?}"
        );
        assert_eq!(programmer.state(), SessionState::Failed);

        // The session never advanced to erase.
        let frames = parse_requests(&programmer.into_port().write_buf);
        assert!(frames.iter().all(|(op, _)| *op != Opcode::EraseFlash));
    }

    #[test]
    fn quit_failure_reports_device_left_in_isp() {
        let image = FlashImage::new(vec![0xFF; SECTOR_SIZE]).unwrap();
        let mut script = induct_response(Opcode::StatusOkey, MODEL_MQ79F121);
        for _ in 0..3 {
            script.extend(status_response(Opcode::Handshake, Opcode::StatusOkey));
        }
        script.extend(status_response(Opcode::EraseFlash, Opcode::StatusOkey));
        script.extend(status_response(Opcode::LoadFlash, Opcode::StatusOkey));
        script.extend(status_response(Opcode::SetOption, Opcode::StatusOkey));
        script.extend(status_response(Opcode::SetProtectOption, Opcode::StatusOkey));
        // Quit rejected on both attempts.
        script.extend(status_response(Opcode::Quit, Opcode::StatusOtherError));
        script.extend(status_response(Opcode::Quit, Opcode::StatusOtherError));

        let mut programmer = Programmer::with_config(MockPort::new(&script), fast_config());
        let err = programmer
            .program(&image, &ProgramOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::DeviceLeftInIsp(_)), "got {err:?}");
        assert_eq!(programmer.state(), SessionState::Failed);
    }

    #[test]
    fn error_status_is_retried_then_surfaced_with_step_name() {
        // Erase rejected on both attempts: the step name travels with the
        // terminal error.
        let image = FlashImage::new(vec![0xFF; SECTOR_SIZE]).unwrap();
        let mut script = induct_response(Opcode::StatusOkey, MODEL_MQ79F121);
        for _ in 0..3 {
            script.extend(status_response(Opcode::Handshake, Opcode::StatusOkey));
        }
        script.extend(status_response(Opcode::EraseFlash, Opcode::StatusFlashEncrypted));
        script.extend(status_response(Opcode::EraseFlash, Opcode::StatusFlashEncrypted));

        let mut programmer = Programmer::with_config(MockPort::new(&script), fast_config());
        let err = programmer
            .program(&image, &ProgramOptions::default())
            .unwrap_err();
        match err {
            Error::StepFailed { step, detail } => {
                assert_eq!(step, Step::Erase);
                assert!(detail.contains("flash encrypted"), "detail: {detail}");
            }
            other => panic!("expected StepFailed, got {other:?}"),
        }
    }

    #[test]
    fn set_customer_info_pads_and_sends_outside_the_default_cycle() {
        let script = status_response(Opcode::SetCustomerInfo, Opcode::StatusOkey);
        let mut programmer = Programmer::with_config(MockPort::new(&script), fast_config());
        programmer.set_customer_info(b"STATION-07").unwrap();

        let written = programmer.into_port().write_buf;
        let opcode = Opcode::from_u16(u16::from_le_bytes([written[6], written[7]]));
        assert_eq!(opcode, Some(Opcode::SetCustomerInfo));
        assert_eq!(written.len(), 29);
        assert_eq!(&written[10..20], b"STATION-07");
        assert_eq!(&written[20..26], &[0u8; 6]);
    }

    #[test]
    fn set_customer_info_rejects_oversized_blocks() {
        let mut programmer = Programmer::with_config(MockPort::new(&[]), fast_config());
        let err = programmer.set_customer_info(&[0u8; 17]).unwrap_err();
        assert!(matches!(
            err,
            Error::StepFailed { step: Step::SetCustomerInfo, .. }
        ));
    }

    #[test]
    fn erase_flash_runs_the_short_cycle_without_writes() {
        let mut script = induct_response(Opcode::StatusOkey, MODEL_MQ79F121);
        for _ in 0..3 {
            script.extend(status_response(Opcode::Handshake, Opcode::StatusOkey));
        }
        script.extend(status_response(Opcode::EraseFlash, Opcode::StatusOkey));
        script.extend(status_response(Opcode::Quit, Opcode::StatusOkey));

        let mut programmer = Programmer::with_config(MockPort::new(&script), fast_config());
        programmer.erase_flash(&ProgramOptions::default()).unwrap();
        assert_eq!(programmer.state(), SessionState::Quit);

        let opcodes: Vec<_> = parse_requests(&programmer.into_port().write_buf)
            .into_iter()
            .map(|(op, _)| op)
            .collect();
        assert_eq!(
            opcodes,
            vec![
                Opcode::Handshake,
                Opcode::Handshake,
                Opcode::Handshake,
                Opcode::EraseFlash,
                Opcode::Quit,
            ]
        );
    }

    #[test]
    fn full_chip_erase_uses_the_longer_budget() {
        let config = SessionConfig::default();
        assert!(config.erase_full.per_attempt_timeout >= Duration::from_secs(1));
        assert!(config.erase_full.per_attempt_timeout > config.command.per_attempt_timeout * 10);
    }

    #[test]
    fn timeout_carries_the_step_name() {
        let mut programmer = Programmer::with_config(MockPort::new(&[]), fast_config());
        let err = programmer.enter_isp_mode().unwrap_err();
        match err {
            Error::Timeout { step, detail } => {
                assert_eq!(step, Step::Induct);
                assert!(detail.contains("attempts"));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }
}
