// Currently the only device supported here is the Keithley 2400 family.  If other source meters are ever
// supported, they'll each get a module next to this one

pub mod k2400;
