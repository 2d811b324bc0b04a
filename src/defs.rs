//! Numeric constants of the ME driver interface.
//!
//! These values are shared with the kernel driver and with remote peers, so
//! they are fixed and must never be renumbered.

#![allow(missing_docs)]

pub const ME_VALUE_NOT_USED: i32 = 0x0;

// Locks
pub const ME_LOCK_RELEASE: i32 = 0x0001_0001;
pub const ME_LOCK_SET: i32 = 0x0001_0002;
pub const ME_LOCK_CHECK: i32 = 0x0001_0003;
pub const ME_LOCK_PRESERVE: i32 = 0x01;
pub const ME_LOCK_FORCE: i32 = 0x10;

pub const ME_OPEN_NO_FLAGS: i32 = 0x0;
pub const ME_CLOSE_NO_FLAGS: i32 = 0x0;

// References
pub const ME_REF_NONE: i32 = 0x0;
pub const ME_REF_AI_GROUND: i32 = 0x0005_0001;
pub const ME_REF_AI_DIFFERENTIAL: i32 = 0x0005_0002;
pub const ME_REF_AO_GROUND: i32 = 0x0006_0001;
pub const ME_REF_AO_DIFFERENTIAL: i32 = 0x0006_0002;
pub const ME_REF_AIO_NONE: i32 = 0x7000_0000;
pub const ME_REF_AIO_DIFFERENTIAL: i32 = 0x7000_0001;
pub const ME_REF_AIO_GROUND: i32 = 0x7000_0002;

// Rich trigger types
pub const ME_TRIG_TYPE_NONE: i32 = 0x0;
pub const ME_TRIG_TYPE_SW: i32 = 0x0008_0001;
pub const ME_TRIG_TYPE_THRESHOLD: i32 = 0x0008_0002;
pub const ME_TRIG_TYPE_WINDOW: i32 = 0x0008_0003;
pub const ME_TRIG_TYPE_EDGE: i32 = 0x0008_0004;
pub const ME_TRIG_TYPE_SLOPE: i32 = 0x0008_0005;
pub const ME_TRIG_TYPE_EXT_DIGITAL: i32 = 0x0008_0006;
pub const ME_TRIG_TYPE_EXT_ANALOG: i32 = 0x0008_0007;
pub const ME_TRIG_TYPE_PATTERN: i32 = 0x0008_0008;
pub const ME_TRIG_TYPE_TIMER: i32 = 0x0008_0009;
pub const ME_TRIG_TYPE_COUNT: i32 = 0x0008_000A;
pub const ME_TRIG_TYPE_FOLLOW: i32 = 0x0008_000B;

// Trigger channels
pub const ME_TRIG_CHAN_NONE: i32 = 0x0;
pub const ME_TRIG_CHAN_DEFAULT: i32 = 0x0007_0001;
pub const ME_TRIG_CHAN_SYNCHRONOUS: i32 = 0x0007_0002;

// Trigger edges
pub const ME_TRIG_EDGE_NONE: i32 = 0x0;
pub const ME_TRIG_EDGE_ABOVE: i32 = 0x0009_0001;
pub const ME_TRIG_EDGE_BELOW: i32 = 0x0009_0002;
pub const ME_TRIG_EDGE_ENTRY: i32 = 0x0009_0003;
pub const ME_TRIG_EDGE_EXIT: i32 = 0x0009_0004;
pub const ME_TRIG_EDGE_RISING: i32 = 0x0009_0005;
pub const ME_TRIG_EDGE_FALLING: i32 = 0x0009_0006;
pub const ME_TRIG_EDGE_ANY: i32 = 0x0009_0007;

// Compact trigger types
pub const ME_TRIGGER_TYPE_SOFTWARE: i32 = 0x00;
pub const ME_TRIGGER_TYPE_DIGITAL: i32 = 0x00;
pub const ME_TRIGGER_TYPE_ANALOG: i32 = 0x10;
pub const ME_TRIGGER_TYPE_ACQ: i32 = 0x01;
pub const ME_TRIGGER_TYPE_LIST: i32 = 0x02;
pub const ME_TRIGGER_TYPE_CONV: i32 = 0x04;
pub const ME_TRIGGER_TYPE_ACQ_DIGITAL: i32 = ME_TRIGGER_TYPE_ACQ | ME_TRIGGER_TYPE_DIGITAL;
pub const ME_TRIGGER_TYPE_ACQ_ANALOG: i32 = ME_TRIGGER_TYPE_ACQ | ME_TRIGGER_TYPE_ANALOG;
pub const ME_TRIGGER_TYPE_LIST_DIGITAL: i32 = ME_TRIGGER_TYPE_LIST | ME_TRIGGER_TYPE_DIGITAL;
pub const ME_TRIGGER_TYPE_LIST_ANALOG: i32 = ME_TRIGGER_TYPE_LIST | ME_TRIGGER_TYPE_ANALOG;
pub const ME_TRIGGER_TYPE_CONV_DIGITAL: i32 = ME_TRIGGER_TYPE_CONV | ME_TRIGGER_TYPE_DIGITAL;
pub const ME_TRIGGER_TYPE_CONV_ANALOG: i32 = ME_TRIGGER_TYPE_CONV | ME_TRIGGER_TYPE_ANALOG;

// Compact stop types
pub const ME_STREAM_STOP_TYPE_MANUAL: i32 = 0x0;
pub const ME_STREAM_STOP_TYPE_ACQ_LIST: i32 = 0x000A_1001;
pub const ME_STREAM_STOP_TYPE_SCAN_VALUE: i32 = 0x000A_1002;

// Timers
pub const ME_TIMER_ACQ_START: i32 = 0x000A_0001;
pub const ME_TIMER_SCAN_START: i32 = 0x000A_0002;
pub const ME_TIMER_CONV_START: i32 = 0x000A_0003;

// Interrupts
pub const ME_IRQ_SOURCE_DIO_DEFAULT: i32 = 0x0;
pub const ME_IRQ_EDGE_NOT_USED: i32 = 0x0;
pub const ME_IRQ_EDGE_RISING: i32 = 0x000C_0001;
pub const ME_IRQ_EDGE_FALLING: i32 = 0x000C_0002;
pub const ME_IRQ_EDGE_ANY: i32 = 0x000C_0003;
pub const ME_IO_IRQ_START_NO_FLAGS: i32 = 0x0;
pub const ME_IO_IRQ_WAIT_NO_FLAGS: i32 = 0x0;
pub const ME_IO_IRQ_STOP_NO_FLAGS: i32 = 0x0;

// Single I/O
pub const ME_DIR_INPUT: i32 = 0x000F_0001;
pub const ME_DIR_OUTPUT: i32 = 0x000F_0002;
pub const ME_SINGLE_CONFIG_DIO_INPUT: i32 = 0x000D_0001;
pub const ME_SINGLE_CONFIG_DIO_OUTPUT: i32 = 0x000D_0002;
pub const ME_IO_SINGLE_NO_FLAGS: i32 = 0x0;
pub const ME_IO_SINGLE_TYPE_NONBLOCKING: i32 = 0x20;
pub const ME_IO_SINGLE_NONBLOCKING: i32 = 0x20;

// Stream I/O
pub const ME_IO_STREAM_CONFIG_TYPE_NO_FLAGS: i32 = 0x0;
pub const ME_IO_STREAM_CONFIG_TYPE_EXTRA_SHUNT: i32 = 0x100;
pub const ME_AI_EXTRA_RANGE: i32 = 0x1000_0000;
pub const ME_STREAM_CONFIG_DIFFERENTIAL: i32 = 0x0010_0000;
pub const ME_READ_MODE_BLOCKING: i32 = 0x0010_0001;
pub const ME_READ_MODE_NONBLOCKING: i32 = 0x0010_0002;
pub const ME_WRITE_MODE_BLOCKING: i32 = 0x0011_0001;
pub const ME_WRITE_MODE_NONBLOCKING: i32 = 0x0011_0002;
pub const ME_IO_STREAM_START_NONBLOCKING: i32 = 0x20;
pub const ME_START_MODE_BLOCKING: i32 = 0x0012_0001;
pub const ME_START_MODE_NONBLOCKING: i32 = 0x0012_0002;
pub const ME_IO_STREAM_STOP_NONBLOCKING: i32 = 0x20;
pub const ME_IO_STREAM_STOP_NO_FLAGS: i32 = 0x0;
pub const ME_STOP_MODE_IMMEDIATE: i32 = 0x0013_0001;
pub const ME_STOP_MODE_LAST_VALUE: i32 = 0x0013_0002;
pub const ME_WAIT_NONE: i32 = 0x0014_0001;
pub const ME_WAIT_IDLE: i32 = 0x0014_0002;
pub const ME_WAIT_BUSY: i32 = 0x0014_0003;
pub const ME_WAIT_START: i32 = 0x0014_0004;
pub const ME_WAIT_STOP: i32 = 0x0014_0005;
pub const ME_STATUS_INVALID: i32 = 0x0;
pub const ME_STATUS_IDLE: i32 = 0x0015_0001;
pub const ME_STATUS_BUSY: i32 = 0x0015_0002;
pub const ME_STATUS_ERROR: i32 = 0x0015_0003;
pub const ME_IO_STREAM_STATUS_NO_FLAGS: i32 = 0x0;
pub const ME_IO_STREAM_NEW_VALUES_SCREEN_FLAG: i32 = 0x0001;
pub const ME_IO_STREAM_NEW_VALUES_ERROR_REPORT_FLAG: i32 = 0x0002;

// Metadata
pub const ME_UNIT_INVALID: i32 = 0x0;
pub const ME_UNIT_VOLT: i32 = 0x0017_0001;
pub const ME_UNIT_AMPERE: i32 = 0x0017_0002;
pub const ME_UNIT_ANY: i32 = 0x0017_0003;
pub const ME_TYPE_INVALID: i32 = 0x0;
pub const ME_TYPE_AO: i32 = 0x0018_0001;
pub const ME_TYPE_AI: i32 = 0x0018_0002;
pub const ME_TYPE_DIO: i32 = 0x0018_0003;
pub const ME_TYPE_CTR: i32 = 0x0018_0006;
pub const ME_SUBTYPE_INVALID: i32 = 0x0;
pub const ME_SUBTYPE_SINGLE: i32 = 0x0019_0001;
pub const ME_SUBTYPE_STREAMING: i32 = 0x0019_0002;
pub const ME_SUBTYPE_CTR_8254: i32 = 0x0019_0003;
pub const ME_SUBTYPE_ANY: i32 = 0x0019_0004;
pub const ME_BUS_TYPE_INVALID: i32 = 0x0;
pub const ME_BUS_TYPE_ANY: i32 = 0x001A_0000;
pub const ME_BUS_TYPE_PCI: i32 = 0x001A_0001;
pub const ME_BUS_TYPE_USB: i32 = 0x001A_0002;
pub const ME_PLUGGED_INVALID: i32 = 0x0;
pub const ME_PLUGGED_IN: i32 = 0x001B_0001;
pub const ME_PLUGGED_OUT: i32 = 0x001B_0002;

/// Version reported by this library for the "library version" query.
pub const ME_VERSION_LIBRARY: i32 = 0x0002_0000;
