//! Wire-level constant tables: delimiter/value tags, operation ids,
//! status codes and the handful of enum values the emulation replies with.

/// IPP version advertised and accepted: 1.1.
pub const VERSION_MAJOR: u8 = 0x01;
pub const VERSION_MINOR: u8 = 0x01;

/// Delimiter tags (RFC 8010 §3.5.1). Anything `<= 0x0f` delimits a group.
pub mod tag {
    pub const OPERATION_ATTRIBUTES: u8 = 0x01;
    pub const JOB_ATTRIBUTES: u8 = 0x02;
    pub const END_OF_ATTRIBUTES: u8 = 0x03;
    pub const PRINTER_ATTRIBUTES: u8 = 0x04;

    /// Value tags (RFC 8010 §3.5.2).
    pub const INTEGER: u8 = 0x21;
    pub const BOOLEAN: u8 = 0x22;
    pub const ENUM: u8 = 0x23;
    pub const TEXT: u8 = 0x41;
    pub const NAME: u8 = 0x42;
    pub const KEYWORD: u8 = 0x44;
    pub const URI: u8 = 0x45;
    pub const CHARSET: u8 = 0x47;
    pub const NATURAL_LANGUAGE: u8 = 0x48;
    pub const MIME_MEDIA_TYPE: u8 = 0x49;
}

/// Operation ids (RFC 2911 §4.4.15 plus the CUPS extension range).
pub mod op {
    pub const PRINT_JOB: u16 = 0x0002;
    pub const PRINT_URI: u16 = 0x0003;
    pub const VALIDATE_JOB: u16 = 0x0004;
    pub const CREATE_JOB: u16 = 0x0005;
    pub const SEND_DOCUMENT: u16 = 0x0006;
    pub const SEND_URI: u16 = 0x0007;
    pub const CANCEL_JOB: u16 = 0x0008;
    pub const GET_JOB_ATTRIBUTES: u16 = 0x0009;
    pub const GET_JOBS: u16 = 0x000a;
    pub const GET_PRINTER_ATTRIBUTES: u16 = 0x000b;
    pub const HOLD_JOB: u16 = 0x000c;
    pub const RELEASE_JOB: u16 = 0x000d;
    pub const RESTART_JOB: u16 = 0x000e;
    pub const PAUSE_PRINTER: u16 = 0x0010;
    pub const RESUME_PRINTER: u16 = 0x0011;
    pub const PURGE_JOBS: u16 = 0x0012;
}

/// Status codes (RFC 8011 §4.1.8).
pub mod status {
    pub const OK: u16 = 0x0000;
    pub const CLIENT_ERROR_BAD_REQUEST: u16 = 0x0400;
    pub const CLIENT_ERROR_NOT_FOUND: u16 = 0x0406;
    pub const SERVER_ERROR_INTERNAL: u16 = 0x0500;
    pub const SERVER_ERROR_OPERATION_NOT_SUPPORTED: u16 = 0x0501;
}

/// job-state enum values (RFC 2911 §4.3.7).
pub mod job_state {
    pub const PENDING: i32 = 3;
    pub const COMPLETED: i32 = 9;
}

/// printer-state enum values (RFC 2911 §4.4.11).
pub mod printer_state {
    pub const IDLE: i32 = 3;
}

/// Human-readable name for an operation id, `None` for codes outside the
/// RFC 2911 and CUPS tables.
pub fn operation_name(operation: u16) -> Option<&'static str> {
    let name = match operation {
        op::PRINT_JOB => "Print-Job",
        op::PRINT_URI => "Print-URI",
        op::VALIDATE_JOB => "Validate-Job",
        op::CREATE_JOB => "Create-Job",
        op::SEND_DOCUMENT => "Send-Document",
        op::SEND_URI => "Send-URI",
        op::CANCEL_JOB => "Cancel-Job",
        op::GET_JOB_ATTRIBUTES => "Get-Job-Attributes",
        op::GET_JOBS => "Get-Jobs",
        op::GET_PRINTER_ATTRIBUTES => "Get-Printer-Attributes",
        op::HOLD_JOB => "Hold-Job",
        op::RELEASE_JOB => "Release-Job",
        op::RESTART_JOB => "Restart-Job",
        op::PAUSE_PRINTER => "Pause-Printer",
        op::RESUME_PRINTER => "Resume-Printer",
        op::PURGE_JOBS => "Purge-Jobs",
        0x4001 => "CUPS-Get-Default",
        0x4002 => "CUPS-Get-Printers",
        0x4003 => "CUPS-Add-Modify-Printer",
        0x4004 => "CUPS-Delete-Printer",
        0x4005 => "CUPS-Get-Classes",
        0x4006 => "CUPS-Add-Modify-Class",
        0x4007 => "CUPS-Delete-Class",
        0x4008 => "CUPS-Accept-Jobs",
        0x4009 => "CUPS-Reject-Jobs",
        0x400a => "CUPS-Set-Default",
        0x400b => "CUPS-Get-Devices",
        0x400c => "CUPS-Get-PPDs",
        0x400d => "CUPS-Move-Job",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_cover_rfc_and_cups_ranges() {
        assert_eq!(operation_name(op::PRINT_JOB), Some("Print-Job"));
        assert_eq!(operation_name(0x400d), Some("CUPS-Move-Job"));
        assert_eq!(operation_name(0x7fff), None);
    }
}
