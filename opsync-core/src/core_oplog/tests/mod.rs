/*
    Scenario tests for the core_oplog subsystem

    Test suite covering:
    - Capture on one device, replay on another, identical state
    - Restart: reopened log and state cache rebuild the same state
    - Concurrent edits resolved by LWW converge on every device
*/


pub mod lww_convergence;
