//! Build script for the cloudlink ESP32 firmware
//!
//! Exports the ESP-IDF environment the esp-idf-svc crates build against.

fn main() {
    embuild::espidf::sysenv::output();
}
