//! Scripted output backend for tests.

use std::collections::HashSet;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;

use parking_lot::Mutex;

use crate::output::{
    BindRequest, CompletionNotifier, CompletionReason, DeviceBinding, DeviceId, OutputBackend,
    OutputError, VolumeMode,
};


pub(crate) struct BindRecord {
    pub device: DeviceId,
    pub volume: f32,
    pub mode: VolumeMode,
    pub notifier: CompletionNotifier,
    calls: Arc<Mutex<Vec<&'static str>>>,
    alive: Arc<AtomicBool>,
}


#[derive( Default )]
struct Script {
    devices: Vec<String>,
    binds: Vec<BindRecord>,
    failing_bind: HashSet<DeviceId>,
    failing_play: HashSet<DeviceId>,
    failing_pause: HashSet<DeviceId>,
}


/// Records every binding and lets a test fire their completions.
#[derive( Clone, Default )]
pub(crate) struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}


impl ScriptedBackend {
    pub fn with_devices( names: &[&str] ) -> Self {
        let backend = Self::default();
        backend.script.lock().devices = names.iter().map( |s| s.to_string() ).collect();
        backend
    }


    pub fn fail_bind( &self, device: DeviceId ) {
        self.script.lock().failing_bind.insert( device );
    }


    pub fn fail_play( &self, device: DeviceId ) {
        self.script.lock().failing_play.insert( device );
    }


    pub fn fail_pause( &self, device: DeviceId ) {
        self.script.lock().failing_pause.insert( device );
    }


    pub fn heal( &self ) {
        let mut script = self.script.lock();
        script.failing_bind.clear();
        script.failing_play.clear();
        script.failing_pause.clear();
    }


    pub fn bind_count( &self ) -> usize {
        self.script.lock().binds.len()
    }


    pub fn live_bindings( &self ) -> usize {
        self.script.lock()
            .binds
            .iter()
            .filter( |b| b.alive.load( Ordering::SeqCst ) )
            .count()
    }


    /// Calls made on the `index`-th binding, in order.
    pub fn calls( &self, index: usize ) -> Vec<&'static str> {
        self.script.lock().binds[ index ].calls.lock().clone()
    }


    pub fn with_record<R>( &self, index: usize, f: impl FnOnce( &BindRecord ) -> R ) -> R {
        f( &self.script.lock().binds[ index ] )
    }


    /// Fires the completion of the `index`-th binding, as its device would.
    pub fn complete( &self, index: usize, reason: CompletionReason ) -> bool {
        let notifier = self.script.lock().binds[ index ].notifier.clone();
        notifier.notify( reason )
    }
}


impl OutputBackend for ScriptedBackend {
    fn output_device_names( &self ) -> Result<Vec<String>, OutputError> {
        Ok( self.script.lock().devices.clone() )
    }


    fn bind( &self, request: BindRequest ) -> Result<Box<dyn DeviceBinding>, OutputError> {
        let mut script = self.script.lock();
        if script.failing_bind.contains( &request.device ) {
            return Err( OutputError::BuildStream( "scripted bind failure".into() ) );
        }

        let calls = Arc::new( Mutex::new( Vec::new() ) );
        let alive = Arc::new( AtomicBool::new( true ) );
        script.binds.push( BindRecord {
            device: request.device,
            volume: request.volume,
            mode: request.mode,
            notifier: request.notifier,
            calls: Arc::clone( &calls ),
            alive: Arc::clone( &alive ),
        });

        Ok( Box::new( ScriptedBinding {
            device: request.device,
            script: Arc::clone( &self.script ),
            calls,
            alive,
        }))
    }
}


struct ScriptedBinding {
    device: DeviceId,
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<&'static str>>>,
    alive: Arc<AtomicBool>,
}


impl DeviceBinding for ScriptedBinding {
    fn play( &mut self ) -> Result<(), OutputError> {
        if self.script.lock().failing_play.contains( &self.device ) {
            return Err( OutputError::PlayStream( "scripted play failure".into() ) );
        }
        self.calls.lock().push( "play" );
        Ok(())
    }


    fn pause( &mut self ) -> Result<(), OutputError> {
        if self.script.lock().failing_pause.contains( &self.device ) {
            return Err( OutputError::PauseStream( "scripted pause failure".into() ) );
        }
        self.calls.lock().push( "pause" );
        Ok(())
    }


    fn set_volume( &mut self, _volume: f32 ) {
        self.calls.lock().push( "volume" );
    }
}


impl Drop for ScriptedBinding {
    fn drop( &mut self ) {
        self.alive.store( false, Ordering::SeqCst );
    }
}
